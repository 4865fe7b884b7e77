//! Mock provisioner for testing
//!
//! Returns canned outputs without touching any real infrastructure.
//! Essential for unit tests, CI pipelines and `weft simulate`.
//!
//! Default outputs for a resource named `web` are `{"id": "web-id"}` merged
//! with its resolved inputs.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ProvisionError;
use crate::resource::{Outputs, ResourceId};

use super::{Lookup, LookupRequest, ProvisionRequest, Provisioner};

/// One recorded `provision` call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request: ProvisionRequest,
    /// Global sequence number when the call started
    pub started: u64,
    /// Global sequence number when the call returned
    pub finished: u64,
}

/// Mock collaborator with configurable outputs, failures and delays.
#[derive(Default)]
pub struct MockProvisioner {
    /// Outputs merged over the defaults, keyed by resource
    overrides: DashMap<ResourceId, Outputs>,
    /// Injected failures, keyed by logical name
    failures: DashMap<String, ProvisionError>,
    /// Artificial latency, keyed by logical name
    delays: DashMap<String, Duration>,
    default_delay: Option<Duration>,
    /// Canned lookup results, keyed by function token
    lookups: DashMap<String, Result<Value, ProvisionError>>,
    calls: DashMap<ResourceId, usize>,
    invocations: Mutex<Vec<Invocation>>,
    lookup_requests: Mutex<Vec<LookupRequest>>,
    sequence: AtomicU64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Extra outputs for one resource (merged over the defaults).
    pub fn with_outputs(self, resource: ResourceId, outputs: Value) -> Self {
        if let Value::Object(map) = outputs {
            self.overrides.insert(resource, map);
        }
        self
    }

    /// Fail every resource with this logical name.
    pub fn with_failure(self, name: impl Into<String>, error: ProvisionError) -> Self {
        self.failures.insert(name.into(), error);
        self
    }

    /// Delay the resource with this logical name.
    pub fn with_delay(self, name: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(name.into(), delay);
        self
    }

    /// Delay every call without a specific delay.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Canned lookup result for a function token.
    pub fn with_lookup(self, token: impl Into<String>, result: Result<Value, ProvisionError>) -> Self {
        self.lookups.insert(token.into(), result);
        self
    }

    /// How many times `resource` was provisioned.
    pub fn call_count(&self, resource: &ResourceId) -> usize {
        self.calls.get(resource).map_or(0, |count| *count)
    }

    /// Total provisioning calls.
    pub fn total_calls(&self) -> usize {
        self.invocations.lock().len()
    }

    /// All completed calls, in completion order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn invocation(&self, resource: &ResourceId) -> Option<Invocation> {
        self.invocations
            .lock()
            .iter()
            .find(|call| &call.request.resource == resource)
            .cloned()
    }

    pub fn lookup_requests(&self) -> Vec<LookupRequest> {
        self.lookup_requests.lock().clone()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn delay_for(&self, name: &str) -> Option<Duration> {
        self.delays
            .get(name)
            .map(|delay| *delay)
            .or(self.default_delay)
    }

    fn enter(&self) -> u64 {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn leave(&self) -> u64 {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn provision(&self, request: ProvisionRequest) -> Result<Outputs, ProvisionError> {
        let started = self.enter();
        *self.calls.entry(request.resource.clone()).or_insert(0) += 1;

        if let Some(delay) = self.delay_for(request.resource.name()) {
            tokio::time::sleep(delay).await;
        }

        let result = match self.failures.get(request.resource.name()) {
            Some(error) => Err(error.clone()),
            None => {
                let mut outputs = Outputs::new();
                outputs.insert(
                    "id".to_string(),
                    Value::String(format!("{}-id", request.resource.name())),
                );
                for (name, value) in &request.inputs.values {
                    outputs.insert(name.clone(), value.clone());
                }
                if let Some(extra) = self.overrides.get(&request.resource) {
                    for (name, value) in extra.iter() {
                        outputs.insert(name.clone(), value.clone());
                    }
                }
                Ok(outputs)
            }
        };

        let finished = self.leave();
        self.invocations.lock().push(Invocation {
            request,
            started,
            finished,
        });
        result
    }
}

#[async_trait]
impl Lookup for MockProvisioner {
    async fn lookup(&self, request: LookupRequest) -> Result<Value, ProvisionError> {
        self.enter();
        if let Some(delay) = self.default_delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.lookups.get(&request.token) {
            Some(canned) => canned.clone(),
            None => Ok(request.args.clone()),
        };
        self.leave();
        self.lookup_requests.lock().push(request);
        result
    }
}
