//! Resource Module - declared units of desired state
//!
//! - `ResourceId`: stable identity (type + logical name)
//! - `ResourceSpec`: a custom resource, provisioned by the collaborator
//! - `ComponentSpec`: a grouping node, never provisioned
//! - `ResourceHandle`: what a declaration returns; hands out output values
//! - `Input`: an attribute value, literal or deferred

mod id;
mod outputs;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use crate::value::DeferredValue;

pub use id::ResourceId;
pub(crate) use outputs::OutputSlots;
pub use outputs::Outputs;

// ═══════════════════════════════════════════════════════════════
// Input
// ═══════════════════════════════════════════════════════════════

/// An input attribute: always a deferred value, literals are pre-resolved.
#[derive(Debug, Clone)]
pub struct Input(DeferredValue<Value>);

impl Input {
    pub fn value(&self) -> &DeferredValue<Value> {
        &self.0
    }

    pub fn into_value(self) -> DeferredValue<Value> {
        self.0
    }

    /// Same input, forced secret.
    pub fn secret(self) -> Self {
        Self(self.0.as_secret())
    }
}

impl From<DeferredValue<Value>> for Input {
    fn from(value: DeferredValue<Value>) -> Self {
        Self(value)
    }
}

impl From<&DeferredValue<Value>> for Input {
    fn from(value: &DeferredValue<Value>) -> Self {
        Self(value.clone())
    }
}

impl From<DeferredValue<String>> for Input {
    fn from(value: DeferredValue<String>) -> Self {
        Self(value.map(Value::String))
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self(DeferredValue::of(value))
    }
}

macro_rules! literal_input {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Input {
            fn from(value: $ty) -> Self {
                Self(DeferredValue::of(Value::from(value)))
            }
        })*
    };
}

literal_input!(&str, String, bool, i32, i64, u32, u64, f64);

// ═══════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════

/// Declaration of a custom resource.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub(crate) id: ResourceId,
    pub(crate) inputs: BTreeMap<String, DeferredValue<Value>>,
    pub(crate) depends_on: Vec<ResourceId>,
    pub(crate) parent: Option<ResourceId>,
    pub(crate) secret_outputs: BTreeSet<String>,
}

impl ResourceSpec {
    pub fn new(kind: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            parent: None,
            secret_outputs: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Set an input attribute (replaces an earlier value of the same name).
    pub fn input(mut self, name: impl Into<String>, value: impl Into<Input>) -> Self {
        self.inputs.insert(name.into(), value.into().into_value());
        self
    }

    /// Extra ordering dependency with no data flow.
    pub fn depends_on(mut self, resource: impl Into<ResourceId>) -> Self {
        let resource = resource.into();
        if !self.depends_on.contains(&resource) {
            self.depends_on.push(resource);
        }
        self
    }

    /// Place this resource inside a component.
    pub fn parent(mut self, component: impl Into<ResourceId>) -> Self {
        self.parent = Some(component.into());
        self
    }

    /// Mark an output attribute secret.
    pub fn secret_output(mut self, name: impl Into<String>) -> Self {
        self.secret_outputs.insert(name.into());
        self
    }
}

/// Declaration of a component: a named group of resources.
///
/// A component invokes no collaborator. It settles once every child and
/// every registered output has settled.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub(crate) id: ResourceId,
    pub(crate) parent: Option<ResourceId>,
    pub(crate) depends_on: Vec<ResourceId>,
}

impl ComponentSpec {
    pub fn new(kind: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            parent: None,
            depends_on: Vec::new(),
        }
    }

    pub fn parent(mut self, component: impl Into<ResourceId>) -> Self {
        self.parent = Some(component.into());
        self
    }

    pub fn depends_on(mut self, resource: impl Into<ResourceId>) -> Self {
        let resource = resource.into();
        if !self.depends_on.contains(&resource) {
            self.depends_on.push(resource);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════

/// Handle to a declared (or forward-referenced) resource.
#[derive(Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    slots: Arc<OutputSlots>,
}

impl ResourceHandle {
    pub(crate) fn new(slots: Arc<OutputSlots>) -> Self {
        Self {
            id: slots.owner().clone(),
            slots,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// One output attribute. Depends on this resource.
    pub fn output(&self, name: &str) -> DeferredValue<Value> {
        self.slots.output(name)
    }

    /// The whole output record; secret if any attribute is.
    pub fn outputs(&self) -> DeferredValue<Value> {
        self.slots.record()
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.id).finish()
    }
}

impl From<&ResourceHandle> for ResourceId {
    fn from(handle: &ResourceHandle) -> Self {
        handle.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::value::ValueState;

    #[test]
    fn literal_inputs_are_resolved() {
        let spec = ResourceSpec::new("aws:ec2/subnet", "public")
            .input("cidrBlock", "10.0.1.0/24")
            .input("mapPublicIp", true)
            .input("az", json!({"zone": "a"}));
        assert_eq!(
            spec.inputs["cidrBlock"].peek(),
            ValueState::Resolved(json!("10.0.1.0/24"))
        );
        assert_eq!(spec.inputs["mapPublicIp"].peek(), ValueState::Resolved(json!(true)));
    }

    #[test]
    fn depends_on_is_deduplicated() {
        let vpc = ResourceId::new("aws:ec2/vpc", "main");
        let spec = ResourceSpec::new("aws:ec2/subnet", "a")
            .depends_on(&vpc)
            .depends_on(&vpc);
        assert_eq!(spec.depends_on, vec![vpc]);
    }

    #[test]
    fn handle_outputs_carry_identity() {
        let handle = ResourceHandle::new(Arc::new(OutputSlots::new(ResourceId::new(
            "aws:s3/bucket",
            "site",
        ))));
        let arn = handle.output("arn");
        assert!(arn.dependencies().contains(handle.id()));
        assert_eq!(ResourceId::from(&handle), *handle.id());
    }

    #[test]
    fn secret_input_wrapper() {
        let input = Input::from("p@ss").secret();
        assert!(input.value().is_secret());
    }
}
