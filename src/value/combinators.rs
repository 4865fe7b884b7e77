//! Combinators - build new deferred values from existing ones
//!
//! Every combinator:
//! - unions the dependency sets of its inputs
//! - raises the secret flag if any input is secret, checked both when the
//!   result is built and again when it settles (an input may be marked
//!   secret by its producer right before settling)
//! - fails fast: a failed input settles the result with the same error
//!   without calling the user function
//! - settles `Failed(Transform)` if the user function panics

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::ValueError;

use super::deferred::{DeferredValue, Resolver};
use super::deps::Dependencies;

fn any_secret(flags: &[Arc<AtomicBool>]) -> bool {
    flags.iter().any(|f| f.load(Ordering::Acquire))
}

/// Run a user function, turning a panic into a `Transform` failure.
///
/// User functions run inside settlement, which may be on the engine task.
fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, ValueError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        ValueError::Transform(format!("function panicked: {}", panic_message(&*payload)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string payload"
    }
}

impl<T: Clone + Send + Sync + 'static> DeferredValue<T> {
    /// Apply `f` once this value resolves.
    pub fn map<U, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Apply a fallible `f`; an `Err` settles the result `Failed(Transform)`.
    pub fn try_map<U, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, String> + Send + 'static,
    {
        let (out, resolver) = DeferredValue::pending(self.deps.clone(), self.is_secret());
        let source_secret = self.secret_flag();
        self.on_settle(move |outcome| {
            if source_secret.load(Ordering::Acquire) {
                resolver.mark_secret();
            }
            let result = match outcome {
                Ok(value) => guarded(|| f(value.clone()))
                    .and_then(|result| result.map_err(ValueError::Transform)),
                Err(error) => Err(error.clone()),
            };
            resolver.settle(result);
        });
        out
    }

    /// Like `map`, but `f` returns another deferred value; the result settles
    /// when that inner value settles.
    ///
    /// Only this value's dependencies are recorded statically; whatever the
    /// inner value depends on is awaited at settlement time.
    pub fn flat_map<U, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> DeferredValue<U> + Send + 'static,
    {
        let (out, resolver) = DeferredValue::pending(self.deps.clone(), self.is_secret());
        let source_secret = self.secret_flag();
        self.on_settle(move |outcome| {
            let inner = match outcome {
                Ok(value) => guarded(|| f(value.clone())),
                Err(error) => Err(error.clone()),
            };
            match inner {
                Ok(inner) => {
                    let inner_secret = inner.secret_flag();
                    inner.on_settle(move |inner_outcome| {
                        if source_secret.load(Ordering::Acquire)
                            || inner_secret.load(Ordering::Acquire)
                        {
                            resolver.mark_secret();
                        }
                        resolver.settle(inner_outcome.clone());
                    });
                }
                Err(error) => {
                    if source_secret.load(Ordering::Acquire) {
                        resolver.mark_secret();
                    }
                    resolver.fail(error);
                }
            }
        });
        out
    }

    /// Resolve once every input resolves, with their values in input order.
    ///
    /// Fails with the first failure to settle; the remaining inputs are ignored.
    pub fn combine_all<I>(values: I) -> DeferredValue<Vec<T>>
    where
        I: IntoIterator<Item = DeferredValue<T>>,
    {
        let values: Vec<DeferredValue<T>> = values.into_iter().collect();
        if values.is_empty() {
            return DeferredValue::of(Vec::new());
        }

        let deps = Dependencies::union_all(values.iter().map(DeferredValue::dependencies));
        let flags: Vec<Arc<AtomicBool>> = values.iter().map(DeferredValue::secret_flag).collect();
        let (out, resolver) = DeferredValue::pending(deps, any_secret(&flags));

        let state = Arc::new(Mutex::new(CombineState {
            slots: vec![None; values.len()],
            remaining: values.len(),
            resolver: Some(resolver),
        }));
        let flags = Arc::new(flags);

        for (index, value) in values.iter().enumerate() {
            let state = Arc::clone(&state);
            let flags = Arc::clone(&flags);
            value.on_settle(move |outcome| {
                let finished = {
                    let mut state = state.lock();
                    state.record(index, outcome)
                };
                if let Some((resolver, result)) = finished {
                    if any_secret(&flags) {
                        resolver.mark_secret();
                    }
                    resolver.settle(result);
                }
            });
        }
        out
    }
}

struct CombineState<T: Send + Sync + 'static> {
    slots: Vec<Option<T>>,
    remaining: usize,
    /// Taken by whichever settlement finishes the combination
    resolver: Option<Resolver<Vec<T>>>,
}

impl<T: Clone + Send + Sync + 'static> CombineState<T> {
    /// Record one input; returns the resolver and result once the output can settle.
    fn record(
        &mut self,
        index: usize,
        outcome: &Result<T, ValueError>,
    ) -> Option<(Resolver<Vec<T>>, Result<Vec<T>, ValueError>)> {
        self.resolver.as_ref()?;
        match outcome {
            Ok(value) => {
                self.slots[index] = Some(value.clone());
                self.remaining -= 1;
                if self.remaining > 0 {
                    return None;
                }
                let values: Vec<T> = self.slots.iter_mut().filter_map(Option::take).collect();
                self.resolver.take().map(|r| (r, Ok(values)))
            }
            Err(error) => self.resolver.take().map(|r| (r, Err(error.clone()))),
        }
    }
}

/// Pair two values; resolves once both resolve.
pub fn zip<A, B>(a: &DeferredValue<A>, b: &DeferredValue<B>) -> DeferredValue<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let right = b.clone();
    let zipped = a.flat_map(move |left| right.map(move |r| (left, r)));
    let secret = zipped.is_secret() || b.is_secret();
    let zipped = DeferredValue {
        deps: a.dependencies().union(b.dependencies()),
        ..zipped
    };
    if secret {
        zipped.as_secret()
    } else {
        zipped
    }
}

impl DeferredValue<String> {
    /// Concatenate string values in order (string interpolation over outputs).
    pub fn concat<I>(parts: I) -> DeferredValue<String>
    where
        I: IntoIterator<Item = DeferredValue<String>>,
    {
        DeferredValue::combine_all(parts).map(|parts| parts.concat())
    }
}

impl<T: Clone + Serialize + Send + Sync + 'static> DeferredValue<T> {
    /// Serialize into a JSON value, e.g. to feed a resource input.
    pub fn to_value(&self) -> DeferredValue<Value> {
        self.try_map(|value| serde_json::to_value(value).map_err(|e| e.to_string()))
    }
}
