//! DeferredValue - a value that becomes available once some asynchronous
//! operation settles
//!
//! Three parts, all shared by clones:
//! - the settle-once cell (`Unresolved → Resolved | Failed`)
//! - the secret flag (monotonic: only ever raised)
//! - the dependency set recorded at construction
//!
//! Settlement is pushed, never polled: continuations registered with
//! [`DeferredValue::on_settle`] fire when the producing side calls its
//! [`Resolver`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::ValueError;
use crate::resource::ResourceId;

use super::cell::{SettleCell, Settled};
use super::deps::Dependencies;

/// Snapshot of a deferred value's state.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueState<T> {
    Unresolved,
    Resolved(T),
    Failed(ValueError),
}

impl<T> ValueState<T> {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// A value of type `T` available at an unspecified future point.
pub struct DeferredValue<T> {
    pub(super) cell: Arc<SettleCell<T>>,
    pub(super) secret: Arc<AtomicBool>,
    pub(super) deps: Dependencies,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            secret: Arc::clone(&self.secret),
            deps: self.deps.clone(),
        }
    }
}

impl<T> fmt::Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("secret", &self.secret.load(Ordering::Acquire))
            .field("deps", &self.deps.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> DeferredValue<T> {
    /// An already-resolved value with no dependencies and no taint.
    pub fn of(value: T) -> Self {
        Self::from_parts(
            SettleCell::settled(Ok(value)),
            false,
            Dependencies::none(),
        )
    }

    /// An already-failed value.
    pub fn failed(error: ValueError) -> Self {
        Self::from_parts(
            SettleCell::settled(Err(error)),
            false,
            Dependencies::none(),
        )
    }

    /// A pending value and the handle that settles it.
    pub fn deferred() -> (Self, Resolver<T>) {
        Self::pending(Dependencies::none(), false)
    }

    /// A pending value standing for an output of `resource`.
    pub fn output_of(resource: ResourceId, secret: bool) -> (Self, Resolver<T>) {
        Self::pending(Dependencies::single(resource), secret)
    }

    pub(crate) fn pending(deps: Dependencies, secret: bool) -> (Self, Resolver<T>) {
        let value = Self::from_parts(SettleCell::unresolved(), secret, deps);
        let resolver = Resolver {
            cell: Arc::clone(&value.cell),
            secret: Arc::clone(&value.secret),
            done: false,
        };
        (value, resolver)
    }

    fn from_parts(cell: SettleCell<T>, secret: bool, deps: Dependencies) -> Self {
        Self {
            cell: Arc::new(cell),
            secret: Arc::new(AtomicBool::new(secret)),
            deps,
        }
    }

    /// Register a continuation; it runs exactly once, in registration order,
    /// immediately if the value has already settled.
    pub fn on_settle<F>(&self, f: F)
    where
        F: FnOnce(&Settled<T>) + Send + 'static,
    {
        self.cell.subscribe(Box::new(f));
    }

    /// Wait for settlement.
    pub async fn resolve(&self) -> Settled<T> {
        if let Some(outcome) = self.cell.peek() {
            return (*outcome).clone();
        }
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        rx.await.unwrap_or(Err(ValueError::Abandoned))
    }

    pub fn is_settled(&self) -> bool {
        self.cell.is_settled()
    }

    /// Current state without waiting.
    pub fn peek(&self) -> ValueState<T> {
        match self.cell.peek().as_deref() {
            None => ValueState::Unresolved,
            Some(Ok(value)) => ValueState::Resolved(value.clone()),
            Some(Err(error)) => ValueState::Failed(error.clone()),
        }
    }
}

impl<T> DeferredValue<T> {
    #[inline]
    pub fn is_secret(&self) -> bool {
        self.secret.load(Ordering::Acquire)
    }

    /// Resources that must settle before this value can.
    #[inline]
    pub fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    /// Same settlement, secret flag forced on. Never clears it.
    pub fn as_secret(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            secret: Arc::new(AtomicBool::new(true)),
            deps: self.deps.clone(),
        }
    }

    /// Shared flag handle, read at settlement time by derived values.
    pub(super) fn secret_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.secret)
    }
}

/// Settles one pending [`DeferredValue`].
///
/// Consumed by settling. Dropping an unsettled resolver settles the value
/// `Failed(Abandoned)` so no continuation waits forever.
pub struct Resolver<T: Send + Sync + 'static> {
    cell: Arc<SettleCell<T>>,
    secret: Arc<AtomicBool>,
    done: bool,
}

impl<T: Send + Sync + 'static> Resolver<T> {
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(self, error: ValueError) {
        self.settle(Err(error));
    }

    pub fn settle(mut self, outcome: Settled<T>) {
        self.done = true;
        self.cell.settle(outcome);
    }

    /// Raise the secret flag before settling (monotonic).
    pub fn mark_secret(&self) {
        self.secret.store(true, Ordering::Release);
    }

    pub fn is_settled(&self) -> bool {
        self.cell.is_settled()
    }
}

impl<T: Send + Sync + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if !self.done {
            self.cell.settle(Err(ValueError::Abandoned));
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.cell.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_resolved_plain_and_independent() {
        let v = DeferredValue::of(42);
        assert_eq!(v.peek(), ValueState::Resolved(42));
        assert!(!v.is_secret());
        assert!(v.dependencies().is_empty());
    }

    #[test]
    fn resolver_settles_pending_value() {
        let (v, resolver) = DeferredValue::<String>::deferred();
        assert_eq!(v.peek(), ValueState::Unresolved);
        resolver.resolve("ready".into());
        assert_eq!(v.peek(), ValueState::Resolved("ready".to_string()));
    }

    #[test]
    fn dropped_resolver_abandons_value() {
        let (v, resolver) = DeferredValue::<u8>::deferred();
        drop(resolver);
        assert_eq!(v.peek(), ValueState::Failed(ValueError::Abandoned));
    }

    #[test]
    fn output_of_records_resource_dependency() {
        let id = ResourceId::new("aws:ec2/vpc", "main");
        let (v, _resolver) = DeferredValue::<u8>::output_of(id.clone(), false);
        assert!(v.dependencies().contains(&id));
    }

    #[test]
    fn as_secret_shares_settlement_but_not_flag() {
        let (v, resolver) = DeferredValue::<u8>::deferred();
        let s = v.as_secret();
        assert!(s.is_secret());
        assert!(!v.is_secret());
        resolver.resolve(9);
        assert_eq!(s.peek(), ValueState::Resolved(9));
    }

    #[test]
    fn as_secret_on_secret_stays_secret() {
        let (v, _r) = DeferredValue::<u8>::output_of(ResourceId::new("t", "n"), true);
        assert!(v.as_secret().as_secret().is_secret());
    }

    #[tokio::test]
    async fn resolve_waits_for_settlement() {
        let (v, resolver) = DeferredValue::<u32>::deferred();
        let waiter = {
            let v = v.clone();
            tokio::spawn(async move { v.resolve().await })
        };
        tokio::task::yield_now().await;
        resolver.resolve(11);
        assert_eq!(waiter.await.unwrap(), Ok(11));
    }

    #[tokio::test]
    async fn resolve_replays_for_every_caller() {
        let v = DeferredValue::of("x".to_string());
        assert_eq!(v.resolve().await, Ok("x".to_string()));
        assert_eq!(v.resolve().await, Ok("x".to_string()));
    }
}
