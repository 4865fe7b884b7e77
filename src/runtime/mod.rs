//! Runtime Module - plan execution
//!
//! Contains the runtime execution components:
//! - `engine`: scheduler/executor with tokio concurrency
//! - `report`: per-node outcomes, collected failures, causal chains
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `stack` and `dag` modules.

mod engine;
mod report;

// Re-export public types
pub use engine::Engine;
pub use report::{CausalChain, Failure, NodeOutcome, NodeStatus, RunReport};
