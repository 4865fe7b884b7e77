//! EventLog - append-only record of one run
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run-level, resource-level and lookup-level variants
//! - EventLog: thread-safe, append-only log, cheap to clone

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::ResourceId;

/// Single event in a run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        stack: String,
        run_id: String,
        resources: usize,
        lookups: usize,
    },
    RunCompleted {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cancelled: usize,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // RESOURCE LEVEL
    // ═══════════════════════════════════════════
    /// Dependencies succeeded; inputs are being resolved. Until
    /// `ResourceStarted`, cancellation still settles the node `Cancelled`
    ResourceScheduled {
        resource: ResourceId,
        dependencies: Vec<ResourceId>,
    },
    /// Collaborator invoked; secret inputs are redacted
    ResourceStarted {
        resource: ResourceId,
        inputs: Value,
    },
    ResourceCompleted {
        resource: ResourceId,
        /// Output attribute names (values may be secret)
        outputs: Vec<String>,
        duration_ms: u64,
    },
    ResourceFailed {
        resource: ResourceId,
        error: String,
        duration_ms: u64,
    },
    ResourceSkipped {
        resource: ResourceId,
        /// Root failure this skip descends from
        root: ResourceId,
    },
    ResourceCancelled {
        resource: ResourceId,
    },

    // ═══════════════════════════════════════════
    // LOOKUPS
    // ═══════════════════════════════════════════
    LookupCompleted {
        token: String,
    },
    LookupFailed {
        token: String,
        error: String,
    },
}

impl EventKind {
    /// Extract the resource if the event is resource-related
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::ResourceScheduled { resource, .. }
            | Self::ResourceStarted { resource, .. }
            | Self::ResourceCompleted { resource, .. }
            | Self::ResourceFailed { resource, .. }
            | Self::ResourceSkipped { resource, .. }
            | Self::ResourceCancelled { resource } => Some(resource),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::LookupCompleted { .. }
            | Self::LookupFailed { .. } => None,
        }
    }

    /// Snake-case tag, matching the serialized `type` field
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunCompleted { .. } => "run_completed",
            Self::ResourceScheduled { .. } => "resource_scheduled",
            Self::ResourceStarted { .. } => "resource_started",
            Self::ResourceCompleted { .. } => "resource_completed",
            Self::ResourceFailed { .. } => "resource_failed",
            Self::ResourceSkipped { .. } => "resource_skipped",
            Self::ResourceCancelled { .. } => "resource_cancelled",
            Self::LookupCompleted { .. } => "lookup_completed",
            Self::LookupFailed { .. } => "lookup_failed",
        }
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        // Id and push under one lock so ids match log order
        let mut events = self.events.write();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        events.push(Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        });
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds read lock for duration of callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events about one resource
    pub fn filter_resource(&self, resource: &ResourceId) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.resource() == Some(resource))
                .cloned()
                .collect()
        })
    }

    /// Count events of one kind (by snake-case name)
    pub fn count(&self, name: &str) -> usize {
        self.with_events(|events| events.iter().filter(|e| e.kind.name() == name).count())
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
