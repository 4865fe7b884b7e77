//! Event Module - audit trail of a run
//!
//! Key types:
//! - `Event`: Envelope with id + timestamp + kind
//! - `EventKind`: run, resource and lookup variants
//! - `EventLog`: Thread-safe, append-only log

mod log;

pub use log::{Event, EventKind, EventLog};
