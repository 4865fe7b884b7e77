//! Engine - drives a plan to completion with tokio
//!
//! Scheduling:
//! - a node is ready once every graph predecessor has succeeded
//! - ready nodes are spawned into a JoinSet and run concurrently
//! - the loop wakes only on a node or lookup completion or on cancellation,
//!   never polls
//!
//! A node task resolves its inputs, then (custom resources only) calls the
//! provisioning collaborator. Completion settles the node's output slots,
//! which wakes every continuation waiting on them.
//!
//! Failure policy: no retries. A failed node's pending transitive dependents
//! are skipped, never invoked, and their outputs settle with the root error.
//! Independent branches keep running.
//!
//! Inputs chosen at run time (`flat_map`) are not graph edges, so running
//! nodes can end up waiting on each other. When every running node waits on
//! an unsettled input and no collaborator call or lookup can still settle
//! one, those nodes fail with `DynamicCycle` instead of hanging the run.

use std::collections::{BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ProvisionError, ValueError};
use crate::event::{EventKind, EventLog};
use crate::provider::{Lookup, LookupRequest, ProvisionRequest, Provisioner, ResolvedInputs};
use crate::resource::{Outputs, ResourceId};
use crate::stack::{LookupNode, Node, Plan};
use crate::value::DeferredValue;

use super::report::{Failure, NodeOutcome, NodeStatus, RunReport};

/// What a node task reports back to the scheduler.
enum NodeResult {
    Succeeded {
        outputs: Arc<Outputs>,
        secret_inputs: BTreeSet<String>,
    },
    ProvisionFailed(ProvisionError),
    InputFailed {
        attribute: String,
        cause: ValueError,
    },
    /// Cancelled before the collaborator was called
    Cancelled,
}

/// Everything a node task needs, detached from the plan.
struct NodeWork {
    id: ResourceId,
    awaited: Vec<(String, DeferredValue<Value>)>,
    component: bool,
}

/// Shared collaborator handles for spawned tasks.
#[derive(Clone)]
struct Collaborators {
    provisioner: Arc<dyn Provisioner>,
    lookup: Option<Arc<dyn Lookup>>,
    permits: Option<Arc<Semaphore>>,
    events: EventLog,
}

impl Collaborators {
    /// Wait for a concurrency permit (if capped); `None` when uncapped.
    async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.permits {
            Some(permits) => Arc::clone(permits).acquire_owned().await.ok(),
            None => None,
        }
    }
}

/// Scheduler/executor over a validated [`Plan`].
pub struct Engine {
    provisioner: Arc<dyn Provisioner>,
    lookup: Option<Arc<dyn Lookup>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            lookup: None,
            config: EngineConfig::default(),
        }
    }

    /// Collaborator answering `Stack::lookup` calls.
    pub fn with_lookup(mut self, lookup: Arc<dyn Lookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the plan to completion.
    pub async fn run(&self, plan: Plan) -> RunReport {
        self.run_with_cancellation(plan, CancellationToken::new()).await
    }

    /// Run the plan; cancelling `cancel` stops further dispatch.
    ///
    /// Nodes already handed to the collaborator complete naturally. Every
    /// other node settles `Cancelled`, including scheduled ones still
    /// resolving inputs or waiting for a permit.
    #[instrument(skip_all, fields(stack = %plan.stack, resources = plan.nodes.len()))]
    pub async fn run_with_cancellation(&self, plan: Plan, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        let run_id = format!("run-{}", Uuid::new_v4());
        let events = EventLog::new();
        let Plan {
            stack,
            nodes,
            graph,
            lookups,
            exports,
        } = plan;

        info!(%run_id, lookups = lookups.len(), "run started");
        events.emit(EventKind::RunStarted {
            stack: stack.clone(),
            run_id: run_id.clone(),
            resources: nodes.len(),
            lookups: lookups.len(),
        });

        let collaborators = Collaborators {
            provisioner: Arc::clone(&self.provisioner),
            lookup: self.lookup.clone(),
            permits: self
                .config
                .max_concurrency
                .map(|limit| Arc::new(Semaphore::new(limit.get()))),
            events: events.clone(),
        };

        // Arguments of lookups still running, by lookup index
        let mut lookup_args: Vec<Option<DeferredValue<Value>>> = Vec::with_capacity(lookups.len());
        let mut lookup_tasks: JoinSet<(usize, Option<Failure>)> = JoinSet::new();
        for (i, lookup) in lookups.into_iter().enumerate() {
            lookup_args.push(Some(lookup.args.clone()));
            let task = run_lookup(lookup, collaborators.clone());
            lookup_tasks.spawn(async move { (i, task.await) });
        }

        let mut run = Schedule::new(&nodes, &graph, events.clone());
        let mut running: JoinSet<(usize, NodeResult)> = JoinSet::new();
        let mut tasks: Vec<Option<AbortHandle>> = nodes.iter().map(|_| None).collect();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                run.cancel_pending();
            }

            while let Some(idx) = run.ready.pop_front() {
                if run.status[idx] != NodeStatus::Pending {
                    continue;
                }
                let work = run.dispatch(idx);
                let task = execute_node(work, collaborators.clone(), cancel.clone());
                tasks[idx] = Some(running.spawn(async move { (idx, task.await) }));
            }

            if running.is_empty() {
                break;
            }

            if !cancelled {
                let lookups_busy = lookup_args.iter().flatten().any(DeferredValue::is_settled);
                let blocked = run.stalled(lookups_busy);
                if !blocked.is_empty() {
                    for (idx, _) in &blocked {
                        if let Some(handle) = tasks[*idx].take() {
                            handle.abort();
                        }
                    }
                    run.break_cycle(blocked);
                    continue;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    info!("run cancelled, no further dispatch");
                    cancelled = true;
                    run.cancel_pending();
                }
                joined = running.join_next() => match joined {
                    Some(Ok((idx, result))) => {
                        tasks[idx] = None;
                        run.complete(idx, result);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => error!(error = %e, "node task aborted"),
                    None => break,
                },
                Some(joined) = lookup_tasks.join_next(), if !lookup_tasks.is_empty() => {
                    match joined {
                        Ok((i, failure)) => {
                            lookup_args[i] = None;
                            run.failures.extend(failure);
                        }
                        Err(e) => error!(error = %e, "lookup task aborted"),
                    }
                }
            }
        }
        run.fail_stranded();

        if cancelled {
            lookup_tasks.abort_all();
        }
        while let Some(joined) = lookup_tasks.join_next().await {
            match joined {
                Ok((_, failure)) => run.failures.extend(failure),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(error = %e, "lookup task aborted"),
            }
        }

        let outcomes: Vec<NodeOutcome> = nodes
            .iter()
            .zip(run.status.iter())
            .map(|(node, status)| NodeOutcome {
                resource: node.id.clone(),
                status: *status,
            })
            .collect();
        let count = |s: NodeStatus| outcomes.iter().filter(|o| o.status == s).count();
        let duration = started.elapsed();
        events.emit(EventKind::RunCompleted {
            succeeded: count(NodeStatus::Succeeded),
            failed: count(NodeStatus::Failed),
            skipped: count(NodeStatus::Skipped),
            cancelled: count(NodeStatus::Cancelled),
            total_duration_ms: duration.as_millis() as u64,
        });
        info!(
            failures = run.failures.len(),
            duration_ms = duration.as_millis() as u64,
            "run finished"
        );

        RunReport {
            stack,
            run_id,
            outcomes,
            failures: run.failures,
            cancelled,
            duration,
            exports: exports.drain(self.config.reveal_secrets),
            events,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Scheduler state
// ═══════════════════════════════════════════════════════════════

struct Schedule<'a> {
    nodes: &'a [Node],
    graph: &'a crate::dag::DependencyGraph,
    index: FxHashMap<&'a ResourceId, usize>,
    status: Vec<NodeStatus>,
    /// Predecessors not yet succeeded
    waiting: Vec<usize>,
    started: Vec<Option<Instant>>,
    ready: VecDeque<usize>,
    failures: Vec<Failure>,
    events: EventLog,
}

impl<'a> Schedule<'a> {
    fn new(nodes: &'a [Node], graph: &'a crate::dag::DependencyGraph, events: EventLog) -> Self {
        let index: FxHashMap<&ResourceId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();
        let waiting: Vec<usize> = nodes
            .iter()
            .map(|n| graph.dependencies(&n.id).len())
            .collect();
        let ready = waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| **w == 0)
            .map(|(i, _)| i)
            .collect();
        Self {
            nodes,
            graph,
            index,
            status: vec![NodeStatus::Pending; nodes.len()],
            waiting,
            started: vec![None; nodes.len()],
            ready,
            failures: Vec::new(),
            events,
        }
    }

    fn dispatch(&mut self, idx: usize) -> NodeWork {
        let node = &self.nodes()[idx];
        self.status[idx] = NodeStatus::Running;
        self.started[idx] = Some(Instant::now());
        debug!(resource = %node.id, "dispatched");
        self.events.emit(EventKind::ResourceScheduled {
            resource: node.id.clone(),
            dependencies: self.graph.dependencies(&node.id).to_vec(),
        });
        NodeWork {
            id: node.id.clone(),
            awaited: node
                .awaited()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            component: node.is_component(),
        }
    }

    /// Plan nodes, borrowed for the plan's lifetime rather than `self`'s.
    fn nodes(&self) -> &'a [Node] {
        self.nodes
    }

    fn elapsed_ms(&self, idx: usize) -> u64 {
        self.started[idx].map_or(0, |t| t.elapsed().as_millis() as u64)
    }

    fn complete(&mut self, idx: usize, result: NodeResult) {
        let node = &self.nodes()[idx];
        if self.status[idx] != NodeStatus::Running {
            // Already settled by the scheduler (runtime cycle)
            return;
        }
        match result {
            NodeResult::Succeeded {
                outputs,
                secret_inputs,
            } => {
                self.status[idx] = NodeStatus::Succeeded;
                self.events.emit(EventKind::ResourceCompleted {
                    resource: node.id.clone(),
                    outputs: outputs.keys().cloned().collect(),
                    duration_ms: self.elapsed_ms(idx),
                });
                debug!(resource = %node.id, "succeeded");
                node.slots.settle(Ok(outputs), &secret_inputs);
                for dependent in self.graph.dependents(&node.id) {
                    if let Some(&d) = self.index.get(dependent) {
                        self.waiting[d] -= 1;
                        if self.waiting[d] == 0 && self.status[d] == NodeStatus::Pending {
                            self.ready.push_back(d);
                        }
                    }
                }
            }
            NodeResult::ProvisionFailed(cause) => {
                let error = ValueError::Provisioning {
                    resource: node.id.clone(),
                    cause: cause.clone(),
                };
                self.failures.push(Failure::Provisioning {
                    resource: node.id.clone(),
                    cause,
                });
                self.fail(idx, error);
            }
            NodeResult::InputFailed { attribute, cause } => {
                let error = ValueError::Input {
                    resource: node.id.clone(),
                    attribute: attribute.clone(),
                    cause: Box::new(cause.clone()),
                };
                self.failures.push(Failure::InputUnavailable {
                    resource: node.id.clone(),
                    attribute,
                    cause,
                });
                self.fail(idx, error);
            }
            NodeResult::Cancelled => self.cancel(idx),
        }
    }

    /// Settle a root failure and skip every pending node downstream of it.
    fn fail(&mut self, idx: usize, error: ValueError) {
        let node = &self.nodes()[idx];
        warn!(resource = %node.id, error = %error, "resource failed");
        self.status[idx] = NodeStatus::Failed;
        self.events.emit(EventKind::ResourceFailed {
            resource: node.id.clone(),
            error: error.to_string(),
            duration_ms: self.elapsed_ms(idx),
        });
        node.slots.settle(Err(error.clone()), &BTreeSet::new());

        for dependent in self.graph.transitive_dependents(&node.id) {
            let Some(&d) = self.index.get(&dependent) else {
                continue;
            };
            if self.status[d] != NodeStatus::Pending {
                continue;
            }
            self.status[d] = NodeStatus::Skipped;
            debug!(resource = %dependent, root = %node.id, "skipped");
            self.events.emit(EventKind::ResourceSkipped {
                resource: dependent.clone(),
                root: node.id.clone(),
            });
            self.failures.push(Failure::SkippedDueToDependency {
                resource: dependent,
                root: node.id.clone(),
            });
            self.nodes[d].slots.settle(Err(error.clone()), &BTreeSet::new());
        }
    }

    fn cancel(&mut self, idx: usize) {
        let node = &self.nodes()[idx];
        self.status[idx] = NodeStatus::Cancelled;
        self.events.emit(EventKind::ResourceCancelled {
            resource: node.id.clone(),
        });
        self.failures.push(Failure::Cancelled {
            resource: node.id.clone(),
        });
        node.slots.settle(
            Err(ValueError::Cancelled {
                resource: node.id.clone(),
            }),
            &BTreeSet::new(),
        );
    }

    /// Cancel every node not yet dispatched.
    fn cancel_pending(&mut self) {
        self.ready.clear();
        for idx in 0..self.nodes.len() {
            if self.status[idx] == NodeStatus::Pending {
                self.cancel(idx);
            }
        }
    }

    /// Running nodes that wait on an input nothing can settle any more,
    /// with the first such input of each. Empty unless every running node
    /// is blocked on inputs and no lookup is between its arguments and its
    /// result.
    fn stalled(&self, lookups_busy: bool) -> Vec<(usize, String)> {
        if lookups_busy || !self.ready.is_empty() {
            return Vec::new();
        }
        let mut blocked = Vec::new();
        for idx in 0..self.nodes.len() {
            if self.status[idx] != NodeStatus::Running {
                continue;
            }
            // All inputs settled: the task is past them, so it can progress
            match self.nodes[idx]
                .awaited()
                .find(|(_, value)| !value.is_settled())
            {
                Some((attribute, _)) => blocked.push((idx, attribute.clone())),
                None => return Vec::new(),
            }
        }
        blocked
    }

    /// Fail every blocked node as a root failure of its own.
    fn break_cycle(&mut self, blocked: Vec<(usize, String)>) {
        let waiting: Vec<ResourceId> = blocked
            .iter()
            .map(|(idx, _)| self.nodes[*idx].id.clone())
            .collect();
        warn!(
            resources = waiting.len(),
            "inputs wait on each other, failing the waiting resources"
        );
        for (idx, attribute) in blocked {
            let cause = ValueError::DynamicCycle {
                waiting: waiting.clone(),
            };
            self.complete(idx, NodeResult::InputFailed { attribute, cause });
        }
    }

    /// Nodes left running by an aborted task fail as internal errors.
    fn fail_stranded(&mut self) {
        for idx in 0..self.nodes.len() {
            if self.status[idx] == NodeStatus::Running {
                let cause = ProvisionError::internal("node task ended without reporting");
                self.complete(idx, NodeResult::ProvisionFailed(cause));
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════════════════════════

/// Resolve every awaited value; the first failure (by attribute name) wins.
async fn resolve_inputs(
    awaited: &[(String, DeferredValue<Value>)],
) -> Result<ResolvedInputs, (String, ValueError)> {
    let settled = join_all(awaited.iter().map(|(_, value)| value.resolve())).await;
    let mut inputs = ResolvedInputs::default();
    for ((name, value), outcome) in awaited.iter().zip(settled) {
        let resolved = outcome.map_err(|cause| (name.clone(), cause))?;
        if value.is_secret() {
            inputs.secrets.insert(name.clone());
        }
        inputs.values.insert(name.clone(), resolved);
    }
    Ok(inputs)
}

async fn execute_node(
    work: NodeWork,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> NodeResult {
    let inputs = tokio::select! {
        biased;
        _ = cancel.cancelled() => return NodeResult::Cancelled,
        resolved = resolve_inputs(&work.awaited) => match resolved {
            Ok(inputs) => inputs,
            Err((attribute, cause)) => return NodeResult::InputFailed { attribute, cause },
        },
    };

    if work.component {
        return NodeResult::Succeeded {
            outputs: Arc::new(inputs.values.into_iter().collect()),
            secret_inputs: inputs.secrets,
        };
    }

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return NodeResult::Cancelled,
        permit = collaborators.permit() => permit,
    };

    collaborators.events.emit(EventKind::ResourceStarted {
        resource: work.id.clone(),
        inputs: inputs.redacted(),
    });

    let secret_inputs = inputs.secrets.clone();
    let request = ProvisionRequest {
        resource: work.id,
        inputs,
    };
    let call = AssertUnwindSafe(collaborators.provisioner.provision(request)).catch_unwind();
    match call.await {
        Ok(Ok(outputs)) => NodeResult::Succeeded {
            outputs: Arc::new(outputs),
            secret_inputs,
        },
        Ok(Err(cause)) => NodeResult::ProvisionFailed(cause),
        Err(_) => NodeResult::ProvisionFailed(ProvisionError::internal(
            "provisioning collaborator panicked",
        )),
    }
}

async fn run_lookup(lookup: LookupNode, collaborators: Collaborators) -> Option<Failure> {
    let LookupNode {
        token,
        args,
        resolver,
    } = lookup;

    let args_value = match args.resolve().await {
        Ok(value) => value,
        Err(error) => {
            // Argument failed upstream: nothing to call
            resolver.fail(error);
            return None;
        }
    };
    if args.is_secret() {
        resolver.mark_secret();
    }

    let result = {
        let _permit = collaborators.permit().await;
        match &collaborators.lookup {
            Some(lookup) => {
                let request = LookupRequest {
                    token: token.clone(),
                    args: args_value,
                };
                AssertUnwindSafe(lookup.lookup(request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(ProvisionError::internal("lookup collaborator panicked")))
            }
            None => Err(ProvisionError::unavailable("no lookup collaborator configured")),
        }
    };

    match result {
        Ok(value) => {
            debug!(%token, "lookup completed");
            collaborators
                .events
                .emit(EventKind::LookupCompleted { token });
            resolver.resolve(value);
            None
        }
        Err(cause) => {
            warn!(%token, error = %cause, "lookup failed");
            collaborators.events.emit(EventKind::LookupFailed {
                token: token.clone(),
                error: cause.to_string(),
            });
            resolver.fail(ValueError::Lookup {
                token: token.clone(),
                cause: cause.clone(),
            });
            Some(Failure::Lookup { token, cause })
        }
    }
}
