//! Dependencies - the set of resources a deferred value waits on
//!
//! Recorded by the combinators as values are derived, so the graph builder
//! reads edges straight off each input without walking any closure.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::resource::ResourceId;

/// Immutable, cheaply clonable set of resource ids.
///
/// BTreeSet keeps iteration deterministic for graph construction and events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies(Arc<BTreeSet<ResourceId>>);

impl Dependencies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(id: ResourceId) -> Self {
        Self(Arc::new(BTreeSet::from([id])))
    }

    /// Union of two sets; reuses an existing allocation when one side is empty.
    pub fn union(&self, other: &Dependencies) -> Self {
        if other.is_empty() || Arc::ptr_eq(&self.0, &other.0) {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self(Arc::new(self.0.union(&other.0).cloned().collect()))
    }

    pub fn union_all<'a>(sets: impl IntoIterator<Item = &'a Dependencies>) -> Self {
        sets.into_iter()
            .fold(Self::none(), |acc, deps| acc.union(deps))
    }

    #[inline]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.0.contains(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> {
        self.0.iter()
    }
}

impl FromIterator<ResourceId> for Dependencies {
    fn from_iter<I: IntoIterator<Item = ResourceId>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("test:index/node", name)
    }

    #[test]
    fn union_merges_and_dedupes() {
        let a: Dependencies = [id("a"), id("b")].into_iter().collect();
        let b: Dependencies = [id("b"), id("c")].into_iter().collect();
        let merged = a.union(&b);
        assert_eq!(merged.len(), 3);
        assert!(merged.contains(&id("c")));
    }

    #[test]
    fn union_with_empty_shares_allocation() {
        let a = Dependencies::single(id("a"));
        let merged = a.union(&Dependencies::none());
        assert!(Arc::ptr_eq(&a.0, &merged.0));
    }

    #[test]
    fn union_all_over_many() {
        let sets = [
            Dependencies::single(id("x")),
            Dependencies::none(),
            Dependencies::single(id("y")),
        ];
        let merged = Dependencies::union_all(&sets);
        let names: Vec<&str> = merged.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }
}
