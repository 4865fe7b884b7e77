//! Value Module - deferred values and their combinators
//!
//! - `DeferredValue<T>`: settle-once value with secret taint and dependencies
//! - `Resolver<T>`: the producing side of a pending value
//! - `Dependencies`: resource ids a value waits on
//! - combinators: `map`, `try_map`, `flat_map`, `combine_all`, `zip`, `concat`

mod cell;
mod combinators;
mod deferred;
mod deps;

pub use cell::Settled;
pub use combinators::zip;
pub use deferred::{DeferredValue, Resolver, ValueState};
pub use deps::Dependencies;
