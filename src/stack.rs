//! Stack - the explicit build context for one graph
//!
//! Collects resource, component, lookup and export declarations, then
//! `build()` derives the dependency graph and validates it:
//!
//! ```text
//! Stack ──resource()/component()/lookup()/export()──► declarations
//!       ──build()──► Plan (acyclic, every dependency declared)
//! ```
//!
//! Edges of a node come from:
//! - the recorded dependencies of every input value
//! - explicit `depends_on`
//! - for a component: its registered outputs and each of its children

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::dag::DependencyGraph;
use crate::error::{Result, WeftError};
use crate::export::ExportRegistry;
use crate::resource::{ComponentSpec, Input, OutputSlots, ResourceHandle, ResourceId, ResourceSpec};
use crate::value::{DeferredValue, Resolver};

pub(crate) enum NodeKind {
    /// Provisioned by the collaborator
    Custom,
    /// Settles from its registered outputs
    Component {
        outputs: BTreeMap<String, DeferredValue<Value>>,
    },
}

/// One declared node, as the engine sees it.
pub(crate) struct Node {
    pub(crate) id: ResourceId,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: BTreeMap<String, DeferredValue<Value>>,
    pub(crate) depends_on: Vec<ResourceId>,
    pub(crate) parent: Option<ResourceId>,
    pub(crate) slots: Arc<OutputSlots>,
}

impl Node {
    pub(crate) fn is_component(&self) -> bool {
        matches!(self.kind, NodeKind::Component { .. })
    }

    /// Values this node must see resolved before it can settle.
    pub(crate) fn awaited(&self) -> impl Iterator<Item = (&String, &DeferredValue<Value>)> {
        let outputs = match &self.kind {
            NodeKind::Custom => None,
            NodeKind::Component { outputs } => Some(outputs.iter()),
        };
        self.inputs.iter().chain(outputs.into_iter().flatten())
    }
}

/// A lookup waiting for its arguments.
pub(crate) struct LookupNode {
    pub(crate) token: String,
    pub(crate) args: DeferredValue<Value>,
    pub(crate) resolver: Resolver<Value>,
}

/// Declarations for one stack.
pub struct Stack {
    name: String,
    nodes: Vec<Node>,
    index: FxHashMap<ResourceId, usize>,
    /// Forward references not yet declared
    references: FxHashMap<ResourceId, Arc<OutputSlots>>,
    lookups: Vec<LookupNode>,
    exports: ExportRegistry,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: FxHashMap::default(),
            references: FxHashMap::default(),
            lookups: Vec::new(),
            exports: ExportRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a custom resource.
    pub fn resource(&mut self, spec: ResourceSpec) -> Result<ResourceHandle> {
        let ResourceSpec {
            id,
            inputs,
            depends_on,
            parent,
            secret_outputs,
        } = spec;
        let slots = self.claim(&id)?;
        slots.declare_secret(secret_outputs);
        Ok(self.insert(Node {
            id,
            kind: NodeKind::Custom,
            inputs,
            depends_on,
            parent,
            slots,
        }))
    }

    /// Declare a component.
    pub fn component(&mut self, spec: ComponentSpec) -> Result<ResourceHandle> {
        let ComponentSpec {
            id,
            parent,
            depends_on,
        } = spec;
        let slots = self.claim(&id)?;
        Ok(self.insert(Node {
            id,
            kind: NodeKind::Component {
                outputs: BTreeMap::new(),
            },
            inputs: BTreeMap::new(),
            depends_on,
            parent,
            slots,
        }))
    }

    /// Handle to a resource declared later. Must be declared before `build()`.
    pub fn reference(&mut self, kind: impl AsRef<str>, name: impl AsRef<str>) -> ResourceHandle {
        let id = ResourceId::new(kind, name);
        if let Some(&i) = self.index.get(&id) {
            return ResourceHandle::new(Arc::clone(&self.nodes[i].slots));
        }
        let slots = self
            .references
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OutputSlots::new(id)));
        ResourceHandle::new(Arc::clone(slots))
    }

    /// Attach outputs to a component.
    pub fn register_outputs<I, K, V>(&mut self, component: &ResourceHandle, outputs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Input>,
    {
        let node = self
            .index
            .get(component.id())
            .map(|&i| &mut self.nodes[i])
            .ok_or_else(|| WeftError::NotAComponent {
                resource: component.id().clone(),
            })?;
        match &mut node.kind {
            NodeKind::Component { outputs: registered } => {
                for (name, value) in outputs {
                    registered.insert(name.into(), value.into().into_value());
                }
                Ok(())
            }
            NodeKind::Custom => Err(WeftError::NotAComponent {
                resource: node.id.clone(),
            }),
        }
    }

    /// Declare a read-only lookup. It runs once `args` resolves; the result
    /// carries the dependencies and secret flag of `args`.
    pub fn lookup(&mut self, token: impl Into<String>, args: impl Into<Input>) -> DeferredValue<Value> {
        let args = args.into().into_value();
        let (result, resolver) = DeferredValue::pending(args.dependencies().clone(), args.is_secret());
        self.lookups.push(LookupNode {
            token: token.into(),
            args,
            resolver,
        });
        result
    }

    /// Register a named export.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Input>) -> Result<()> {
        self.exports.export(name, value)
    }

    pub fn exports(&self) -> &ExportRegistry {
        &self.exports
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn claim(&mut self, id: &ResourceId) -> Result<Arc<OutputSlots>> {
        if self.index.contains_key(id) {
            return Err(WeftError::DuplicateIdentity {
                resource: id.clone(),
            });
        }
        Ok(self
            .references
            .remove(id)
            .unwrap_or_else(|| Arc::new(OutputSlots::new(id.clone()))))
    }

    fn insert(&mut self, node: Node) -> ResourceHandle {
        debug!(resource = %node.id, component = node.is_component(), "declared");
        let handle = ResourceHandle::new(Arc::clone(&node.slots));
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        handle
    }

    /// Validate declarations and derive the dependency graph.
    ///
    /// Nothing has been provisioned when this fails.
    pub fn build(self) -> Result<Plan> {
        if let Some(dangling) = self.references.keys().min() {
            // Referenced only; report against the first node that uses it
            let user = self.nodes.iter().find(|node| {
                node.awaited().any(|(_, v)| v.dependencies().contains(dangling))
                    || node.depends_on.contains(dangling)
            });
            return Err(WeftError::UnknownDependency {
                resource: user.map_or_else(|| dangling.clone(), |n| n.id.clone()),
                dependency: dangling.clone(),
            });
        }

        let mut children: FxHashMap<&ResourceId, Vec<ResourceId>> = FxHashMap::default();
        for node in &self.nodes {
            if let Some(parent) = &node.parent {
                match self.index.get(parent).map(|&i| &self.nodes[i]) {
                    Some(p) if p.is_component() => {
                        children.entry(parent).or_default().push(node.id.clone());
                    }
                    _ => {
                        return Err(WeftError::InvalidParent {
                            resource: node.id.clone(),
                            parent: parent.clone(),
                        })
                    }
                }
            }
        }

        let entries: Vec<(ResourceId, Vec<ResourceId>)> = self
            .nodes
            .iter()
            .map(|node| {
                let mut deps: Vec<ResourceId> = Vec::new();
                for (_, value) in node.awaited() {
                    deps.extend(value.dependencies().iter().cloned());
                }
                deps.extend(node.depends_on.iter().cloned());
                if let Some(kids) = children.get(&node.id) {
                    deps.extend(kids.iter().cloned());
                }
                (node.id.clone(), deps)
            })
            .collect();

        let graph = DependencyGraph::build(entries)?;
        debug!(stack = %self.name, resources = graph.len(), "graph built");

        Ok(Plan {
            stack: self.name,
            nodes: self.nodes,
            graph,
            lookups: self.lookups,
            exports: self.exports,
        })
    }
}

/// A validated stack, ready to run.
pub struct Plan {
    pub(crate) stack: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) graph: DependencyGraph,
    pub(crate) lookups: Vec<LookupNode>,
    pub(crate) exports: ExportRegistry,
}

impl Plan {
    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn exports(&self) -> &ExportRegistry {
        &self.exports
    }

    pub fn topological_order(&self) -> Vec<ResourceId> {
        self.graph.topological_order()
    }

    /// Number of declared resources and components.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_component(&self, id: &ResourceId) -> bool {
        self.nodes.iter().any(|node| &node.id == id && node.is_component())
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("stack", &self.stack)
            .field("resources", &self.nodes.len())
            .field("lookups", &self.lookups.len())
            .field("exports", &self.exports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vpc() -> ResourceSpec {
        ResourceSpec::new("aws:ec2/vpc", "main").input("cidrBlock", "10.0.0.0/16")
    }

    #[test]
    fn test_duplicate_identity() {
        let mut stack = Stack::new("dev");
        stack.resource(vpc()).unwrap();
        let err = stack.resource(vpc()).unwrap_err();
        assert!(matches!(err, WeftError::DuplicateIdentity { .. }));
    }

    #[test]
    fn test_same_name_different_type_is_allowed() {
        let mut stack = Stack::new("dev");
        stack.resource(ResourceSpec::new("aws:s3/bucket", "site")).unwrap();
        stack
            .resource(ResourceSpec::new("aws:cloudfront/distribution", "site"))
            .unwrap();
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_edges_from_data_and_explicit_dependencies() {
        let mut stack = Stack::new("dev");
        let vpc = stack.resource(vpc()).unwrap();
        let subnet = stack
            .resource(ResourceSpec::new("aws:ec2/subnet", "a").input("vpcId", vpc.output("id")))
            .unwrap();
        let sg = stack
            .resource(
                ResourceSpec::new("aws:ec2/securityGroup", "web")
                    .input(
                        "description",
                        vpc.output("id").map(|id| Value::String(format!("sg in {id}"))),
                    )
                    .depends_on(&subnet),
            )
            .unwrap();

        let plan = stack.build().unwrap();
        let graph = plan.graph();
        assert_eq!(graph.dependencies(subnet.id()), &[vpc.id().clone()]);
        let mut sg_deps = graph.dependencies(sg.id()).to_vec();
        sg_deps.sort();
        let mut expected = vec![vpc.id().clone(), subnet.id().clone()];
        expected.sort();
        assert_eq!(sg_deps, expected);
    }

    #[test]
    fn test_forward_reference_cycle_is_rejected() {
        let mut stack = Stack::new("dev");
        let b_ref = stack.reference("test:index/node", "b");
        let a = stack
            .resource(ResourceSpec::new("test:index/node", "a").input("x", b_ref.output("out")))
            .unwrap();
        stack
            .resource(ResourceSpec::new("test:index/node", "b").input("y", a.output("out")))
            .unwrap();
        let err = stack.build().unwrap_err();
        assert!(matches!(err, WeftError::CyclicDependency { ref cycle } if cycle.len() == 2));
    }

    #[test]
    fn test_undeclared_reference_is_unknown_dependency() {
        let mut stack = Stack::new("dev");
        let ghost = stack.reference("test:index/node", "ghost");
        stack
            .resource(ResourceSpec::new("test:index/node", "a").input("x", ghost.output("out")))
            .unwrap();
        let err = stack.build().unwrap_err();
        assert!(matches!(
            err,
            WeftError::UnknownDependency { ref resource, ref dependency }
                if resource.name() == "a" && dependency.name() == "ghost"
        ));
    }

    #[test]
    fn test_unknown_explicit_dependency() {
        let mut stack = Stack::new("dev");
        stack
            .resource(vpc().depends_on(ResourceId::new("aws:iam/role", "missing")))
            .unwrap();
        assert!(matches!(
            stack.build().unwrap_err(),
            WeftError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_component_depends_on_children() {
        let mut stack = Stack::new("dev");
        let net = stack
            .component(ComponentSpec::new("acme:net/network", "core"))
            .unwrap();
        let vpc = stack.resource(vpc().parent(&net)).unwrap();
        stack
            .register_outputs(&net, [("vpcId", vpc.output("id"))])
            .unwrap();
        let app = stack
            .resource(ResourceSpec::new("acme:app/service", "api").depends_on(&net))
            .unwrap();

        let plan = stack.build().unwrap();
        assert!(plan.graph().has_path(vpc.id(), net.id()));
        assert!(plan.graph().has_path(vpc.id(), app.id()));
        assert!(plan.is_component(net.id()));
    }

    #[test]
    fn test_parent_must_be_component() {
        let mut stack = Stack::new("dev");
        let vpc = stack.resource(vpc()).unwrap();
        stack
            .resource(ResourceSpec::new("aws:ec2/subnet", "a").parent(&vpc))
            .unwrap();
        assert!(matches!(
            stack.build().unwrap_err(),
            WeftError::InvalidParent { .. }
        ));
    }

    #[test]
    fn test_register_outputs_on_custom_resource_fails() {
        let mut stack = Stack::new("dev");
        let vpc = stack.resource(vpc()).unwrap();
        let err = stack.register_outputs(&vpc, [("x", 1)]).unwrap_err();
        assert!(matches!(err, WeftError::NotAComponent { .. }));
    }

    #[test]
    fn test_lookup_inherits_argument_dependencies() {
        let mut stack = Stack::new("dev");
        let vpc = stack.resource(vpc()).unwrap();
        let subnets = stack.lookup("aws:ec2/getSubnets", vpc.output("id"));
        assert!(subnets.dependencies().contains(vpc.id()));

        let secret = stack.lookup("aws:kms/getKey", Input::from("alias/x").secret());
        assert!(secret.is_secret());
    }

    #[test]
    fn test_plan_exposes_order_and_exports() {
        let mut stack = Stack::new("dev");
        let vpc = stack.resource(vpc()).unwrap();
        stack.export("vpcId", vpc.output("id")).unwrap();
        assert!(stack.export("vpcId", 1).is_err());
        let plan = stack.build().unwrap();
        assert_eq!(plan.topological_order(), vec![vpc.id().clone()]);
        assert_eq!(plan.exports().len(), 1);
        assert_eq!(plan.stack(), "dev");
    }
}
