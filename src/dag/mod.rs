//! DAG Module - dependency graph between resources
//!
//! - `DependencyGraph`: adjacency in both directions, cycle detection,
//!   topological order, reachability

mod graph;

pub use graph::{DepVec, DependencyGraph};
