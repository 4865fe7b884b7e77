//! SettleCell - the settle-once state machine behind every deferred value
//!
//! States: `Unresolved → Resolved | Failed` (terminal).
//!
//! Continuations registered before settlement are queued and fired exactly
//! once, in registration order, outside the lock. A continuation registered
//! while the queue is still draining is appended to the same queue, so
//! registration order holds even for re-entrant subscriptions. Once the
//! queue is empty, late subscribers replay the cached outcome immediately.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::error::ValueError;

/// Outcome of a settled value.
pub type Settled<T> = Result<T, ValueError>;

pub(crate) type Continuation<T> = Box<dyn FnOnce(&Settled<T>) + Send + 'static>;

struct Inner<T> {
    /// `Some` once settled; never written twice
    settled: Option<Arc<Settled<T>>>,
    /// Continuations waiting for settlement (FIFO)
    pending: VecDeque<Continuation<T>>,
    /// True while `settle` is firing queued continuations
    draining: bool,
}

pub(crate) struct SettleCell<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Send + Sync + 'static> SettleCell<T> {
    pub(crate) fn unresolved() -> Self {
        Self {
            inner: Mutex::new(Inner {
                settled: None,
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub(crate) fn settled(outcome: Settled<T>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                settled: Some(Arc::new(outcome)),
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Settle the cell. Returns `false` (and drops `outcome`) if already settled.
    pub(crate) fn settle(&self, outcome: Settled<T>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.settled.is_some() {
                return false;
            }
            inner.settled = Some(Arc::new(outcome));
            inner.draining = true;
        }
        self.drain();
        true
    }

    fn drain(&self) {
        loop {
            let (next, outcome) = {
                let mut inner = self.inner.lock();
                match inner.pending.pop_front() {
                    Some(next) => {
                        // settled is always Some while draining
                        let Some(outcome) = inner.settled.clone() else {
                            inner.draining = false;
                            return;
                        };
                        (next, outcome)
                    }
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            // A panicking continuation must not strand the ones queued after it
            if panic::catch_unwind(AssertUnwindSafe(|| next(&outcome))).is_err() {
                error!("settlement continuation panicked");
            }
        }
    }

    /// Register a continuation; fires immediately if already settled.
    pub(crate) fn subscribe(&self, continuation: Continuation<T>) {
        let mut inner = self.inner.lock();
        let ready = if inner.draining {
            None
        } else {
            inner.settled.clone()
        };
        match ready {
            Some(outcome) => {
                drop(inner);
                continuation(&outcome);
            }
            None => inner.pending.push_back(continuation),
        }
    }

    /// Snapshot of the outcome, if settled.
    pub(crate) fn peek(&self) -> Option<Arc<Settled<T>>> {
        self.inner.lock().settled.clone()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.inner.lock().settled.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Continuation<u32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |tag: &str| -> Continuation<u32> {
            let log = Arc::clone(&log2);
            let tag = tag.to_string();
            Box::new(move |outcome: &Settled<u32>| {
                let value = match outcome {
                    Ok(v) => v.to_string(),
                    Err(e) => e.to_string(),
                };
                log.lock().push(format!("{tag}={value}"));
            })
        };
        (log, make)
    }

    #[test]
    fn settles_only_once() {
        let cell = SettleCell::unresolved();
        assert!(cell.settle(Ok(1)));
        assert!(!cell.settle(Ok(2)));
        assert!(!cell.settle(Err(ValueError::Abandoned)));
        assert_eq!(*cell.peek().unwrap(), Ok(1));
    }

    #[test]
    fn continuations_fire_in_registration_order() {
        let cell = SettleCell::unresolved();
        let (log, make) = recorder();
        cell.subscribe(make("a"));
        cell.subscribe(make("b"));
        cell.subscribe(make("c"));
        assert!(log.lock().is_empty());

        cell.settle(Ok(7));
        assert_eq!(*log.lock(), vec!["a=7", "b=7", "c=7"]);
    }

    #[test]
    fn late_subscriber_replays_cached_outcome() {
        let cell = SettleCell::unresolved();
        let (log, make) = recorder();
        cell.settle(Err(ValueError::Abandoned));
        cell.subscribe(make("late"));
        assert_eq!(
            *log.lock(),
            vec!["late=value was abandoned before it settled"]
        );
    }

    #[test]
    fn reentrant_subscription_keeps_order() {
        let cell: Arc<SettleCell<u32>> = Arc::new(SettleCell::unresolved());
        let (log, make) = recorder();

        let inner_cell = Arc::clone(&cell);
        let nested = make("nested");
        let first_log = Arc::clone(&log);
        cell.subscribe(Box::new(move |_| {
            first_log.lock().push("first".into());
            // Registered while draining: must run after "second"
            inner_cell.subscribe(nested);
        }));
        cell.subscribe(make("second"));

        cell.settle(Ok(3));
        assert_eq!(*log.lock(), vec!["first", "second=3", "nested=3"]);
    }

    #[test]
    fn panicking_continuation_does_not_block_the_queue() {
        let cell = SettleCell::unresolved();
        let (log, make) = recorder();
        cell.subscribe(Box::new(|_: &Settled<u32>| panic!("continuation bug")));
        cell.subscribe(make("after"));

        cell.settle(Ok(1));
        cell.subscribe(make("late"));
        assert_eq!(*log.lock(), vec!["after=1", "late=1"]);
    }

    #[test]
    fn pre_settled_cell_is_settled() {
        let cell = SettleCell::settled(Ok(5u32));
        assert!(cell.is_settled());
        let (log, make) = recorder();
        cell.subscribe(make("x"));
        assert_eq!(*log.lock(), vec!["x=5"]);
    }
}
