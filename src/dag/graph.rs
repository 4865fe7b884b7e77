//! DependencyGraph - DAG of resources built from recorded dependencies
//!
//! Performance notes:
//! - ResourceId clones are Arc clones
//! - FxHashMap for faster hashing (non-crypto)
//! - SmallVec for stack-allocated small edge lists (0-4 items)
//!
//! Validation:
//! - Unknown dependency detection
//! - Cycle detection using DFS three-color algorithm

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{Result, WeftError};
use crate::resource::ResourceId;

/// Stack-allocated edges: most resources have 0-4 dependencies
pub type DepVec = SmallVec<[ResourceId; 4]>;

/// Graph of "must settle before" relations between resources.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// id -> resources that depend on it
    successors: FxHashMap<ResourceId, DepVec>,
    /// id -> resources it depends on
    predecessors: FxHashMap<ResourceId, DepVec>,
    /// All ids in declaration order
    ids: Vec<ResourceId>,
}

impl DependencyGraph {
    /// Build and validate a graph from `(resource, dependencies)` entries.
    ///
    /// Fails with `UnknownDependency` if an edge names an undeclared resource
    /// and with `CyclicDependency` if the edges close a cycle.
    pub fn build<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ResourceId, Vec<ResourceId>)>,
    {
        let entries: Vec<(ResourceId, Vec<ResourceId>)> = entries.into_iter().collect();
        let capacity = entries.len();
        let mut successors: FxHashMap<ResourceId, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut predecessors: FxHashMap<ResourceId, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut ids = Vec::with_capacity(capacity);

        for (id, _) in &entries {
            successors.insert(id.clone(), DepVec::new());
            predecessors.insert(id.clone(), DepVec::new());
            ids.push(id.clone());
        }

        for (id, deps) in entries {
            for dep in deps {
                if !successors.contains_key(&dep) {
                    return Err(WeftError::UnknownDependency {
                        resource: id,
                        dependency: dep,
                    });
                }
                let preds = predecessors.entry(id.clone()).or_default();
                if preds.contains(&dep) {
                    continue;
                }
                preds.push(dep.clone());
                successors.entry(dep).or_default().push(id.clone());
            }
        }

        let graph = Self {
            successors,
            predecessors,
            ids,
        };
        if let Some(cycle) = graph.detect_cycles() {
            return Err(WeftError::CyclicDependency { cycle });
        }
        Ok(graph)
    }

    /// Resources `id` depends on.
    #[inline]
    pub fn dependencies(&self, id: &ResourceId) -> &[ResourceId] {
        self.predecessors
            .get(id)
            .map_or(&[] as &[ResourceId], SmallVec::as_slice)
    }

    /// Resources depending directly on `id`.
    #[inline]
    pub fn dependents(&self, id: &ResourceId) -> &[ResourceId] {
        self.successors
            .get(id)
            .map_or(&[] as &[ResourceId], SmallVec::as_slice)
    }

    /// All ids, in declaration order.
    pub fn ids(&self) -> &[ResourceId] {
        &self.ids
    }

    #[inline]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.predecessors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resources with no dependencies, in declaration order.
    pub fn roots(&self) -> Vec<ResourceId> {
        self.ids
            .iter()
            .filter(|id| self.dependencies(id).is_empty())
            .cloned()
            .collect()
    }

    /// Check if there's a path from `from` to `to` (BFS over dependents)
    pub fn has_path(&self, from: &ResourceId, to: &ResourceId) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&ResourceId> = FxHashSet::default();
        let mut queue: VecDeque<&ResourceId> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for next in self.dependents(current) {
                if next == to {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        false
    }

    /// Every resource reachable from `id` through dependents (excluding `id`),
    /// in BFS order.
    pub fn transitive_dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut visited: FxHashSet<&ResourceId> = FxHashSet::default();
        let mut queue: VecDeque<&ResourceId> = VecDeque::new();
        let mut found = Vec::new();

        visited.insert(id);
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            for next in self.dependents(current) {
                if visited.insert(next) {
                    found.push(next.clone());
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// A valid linearization (Kahn); ties broken by declaration order.
    pub fn topological_order(&self) -> Vec<ResourceId> {
        let position: FxHashMap<&ResourceId, usize> =
            self.ids.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut in_degree: Vec<usize> = self
            .ids
            .iter()
            .map(|id| self.dependencies(id).len())
            .collect();

        let mut ready: std::collections::BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(next) = ready.pop_first() {
            let id = &self.ids[next];
            order.push(id.clone());
            for dependent in self.dependents(id) {
                if let Some(&pos) = position.get(dependent) {
                    in_degree[pos] -= 1;
                    if in_degree[pos] == 0 {
                        ready.insert(pos);
                    }
                }
            }
        }
        order
    }

    /// Detect a cycle using DFS with three-color marking.
    ///
    /// Returns the participants in cycle order, or `None` if acyclic.
    ///
    /// - White: unvisited
    /// - Gray: currently on the DFS path (visiting)
    /// - Black: fully processed (all descendants visited)
    ///
    /// A cycle is detected when we encounter a Gray node while traversing.
    /// The walk keeps its own frame stack, so chain depth is not bounded by
    /// the thread's call stack.
    pub fn detect_cycles(&self) -> Option<Vec<ResourceId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: FxHashMap<&ResourceId, Color> =
            self.ids.iter().map(|id| (id, Color::White)).collect();
        // (node, index of the next successor to visit); doubles as the path
        let mut frames: Vec<(&ResourceId, usize)> = Vec::new();

        for root in &self.ids {
            if colors.get(root) != Some(&Color::White) {
                continue;
            }
            colors.insert(root, Color::Gray);
            frames.push((root, 0));

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some(neighbor) = self.dependents(node).get(next) else {
                    frames.pop();
                    colors.insert(node, Color::Black);
                    continue;
                };
                frame.1 += 1;

                match colors.get(neighbor).copied() {
                    Some(Color::Gray) => {
                        // Gray means neighbor is on the current path
                        let start = frames
                            .iter()
                            .position(|(id, _)| *id == neighbor)
                            .unwrap_or(0);
                        return Some(frames[start..].iter().map(|(id, _)| (*id).clone()).collect());
                    }
                    Some(Color::White) | None => {
                        colors.insert(neighbor, Color::Gray);
                        frames.push((neighbor, 0));
                    }
                    Some(Color::Black) => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("test:index/node", name)
    }

    fn graph(edges: &[(&str, &[&str])]) -> Result<DependencyGraph> {
        DependencyGraph::build(
            edges
                .iter()
                .map(|(node, deps)| (id(node), deps.iter().map(|d| id(d)).collect())),
        )
    }

    // ═══════════════════════════════════════════════════════════════
    // CYCLE DETECTION TESTS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_detect_cycle_simple() {
        // a → b → c → a
        let err = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]).unwrap_err();
        let WeftError::CyclicDependency { cycle } = &err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(cycle.len(), 3);
        assert!(err.to_string().contains("WEFT-003"));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = graph(&[("a", &["a"])]).unwrap_err();
        assert!(matches!(err, WeftError::CyclicDependency { ref cycle } if cycle == &[id("a")]));
    }

    #[test]
    fn test_cycle_report_names_only_participants() {
        // root → x ⇄ y ; z independent
        let err = graph(&[
            ("root", &[]),
            ("x", &["root", "y"]),
            ("y", &["x"]),
            ("z", &[]),
        ])
        .unwrap_err();
        let WeftError::CyclicDependency { mut cycle } = err else {
            panic!("expected cycle");
        };
        cycle.sort();
        assert_eq!(cycle, vec![id("x"), id("y")]);
    }

    #[test]
    fn test_deep_chain_does_not_exhaust_the_stack() {
        let names: Vec<String> = (0..50_000).map(|i| format!("n{i}")).collect();
        let mut edges: Vec<(ResourceId, Vec<ResourceId>)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let deps = if i == 0 { vec![] } else { vec![id(&names[i - 1])] };
                (id(name), deps)
            })
            .collect();
        let graph = DependencyGraph::build(edges.clone()).unwrap();
        assert!(graph.detect_cycles().is_none());

        // Close the chain into one long cycle
        edges[0].1.push(id(&names[names.len() - 1]));
        let err = DependencyGraph::build(edges).unwrap_err();
        let WeftError::CyclicDependency { cycle } = err else {
            panic!("expected cycle");
        };
        assert_eq!(cycle.len(), names.len());
    }

    #[test]
    fn test_no_cycle_diamond() {
        let g = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ])
        .unwrap();
        assert!(g.detect_cycles().is_none());
        assert_eq!(g.roots(), vec![id("a")]);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = graph(&[("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, WeftError::UnknownDependency { .. }));
    }

    // ═══════════════════════════════════════════════════════════════
    // TRAVERSAL TESTS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_duplicate_edges_collapse() {
        let g = graph(&[("a", &[]), ("b", &["a", "a"])]).unwrap();
        assert_eq!(g.dependencies(&id("b")), &[id("a")]);
        assert_eq!(g.dependents(&id("a")), &[id("b")]);
    }

    #[test]
    fn test_topological_order_respects_edges_and_declaration() {
        let g = graph(&[
            ("c", &["b", "a"]),
            ("b", &["a"]),
            ("a", &[]),
            ("z", &[]),
        ])
        .unwrap();
        assert_eq!(g.topological_order(), vec![id("a"), id("z"), id("b"), id("c")]);
    }

    #[test]
    fn test_has_path_and_transitive_dependents() {
        let g = graph(&[
            ("vpc", &[]),
            ("subnet", &["vpc"]),
            ("instance", &["subnet"]),
            ("bucket", &[]),
        ])
        .unwrap();
        assert!(g.has_path(&id("vpc"), &id("instance")));
        assert!(!g.has_path(&id("instance"), &id("vpc")));
        assert!(!g.has_path(&id("bucket"), &id("instance")));
        assert_eq!(
            g.transitive_dependents(&id("vpc")),
            vec![id("subnet"), id("instance")]
        );
        assert!(g.transitive_dependents(&id("bucket")).is_empty());
    }
}
