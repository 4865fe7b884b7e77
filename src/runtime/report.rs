//! RunReport - what a run did, node by node
//!
//! Failures are collected, never short-circuited: every root failure and
//! every collateral skip is listed, and `causal_chains()` groups the skips
//! under the root that caused them.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{ProvisionError, Result, ValueError, WeftError};
use crate::event::EventLog;
use crate::export::ExportReport;
use crate::resource::ResourceId;

/// Terminal state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never invoked: a dependency failed
    Skipped,
    /// Never invoked: the run was cancelled first
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

fn display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// One terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The collaborator rejected the resource
    Provisioning {
        resource: ResourceId,
        #[serde(serialize_with = "display")]
        cause: ProvisionError,
    },
    /// Every dependency succeeded, but an input could not be resolved
    InputUnavailable {
        resource: ResourceId,
        attribute: String,
        #[serde(serialize_with = "display")]
        cause: ValueError,
    },
    /// A lookup collaborator call failed
    Lookup {
        token: String,
        #[serde(serialize_with = "display")]
        cause: ProvisionError,
    },
    /// Never invoked because `root` failed
    SkippedDueToDependency { resource: ResourceId, root: ResourceId },
    /// Never invoked because the run was cancelled
    Cancelled { resource: ResourceId },
}

impl Failure {
    /// Resource this failure is about (none for lookups).
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::Provisioning { resource, .. }
            | Self::InputUnavailable { resource, .. }
            | Self::SkippedDueToDependency { resource, .. }
            | Self::Cancelled { resource } => Some(resource),
            Self::Lookup { .. } => None,
        }
    }

    /// True for failures that originate somewhere, false for collateral ones.
    pub fn is_root(&self) -> bool {
        matches!(
            self,
            Self::Provisioning { .. } | Self::InputUnavailable { .. } | Self::Lookup { .. }
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning { resource, cause } => write!(f, "{resource}: {cause}"),
            Self::InputUnavailable {
                resource,
                attribute,
                cause,
            } => write!(f, "{resource}: input '{attribute}' unavailable: {cause}"),
            Self::Lookup { token, cause } => write!(f, "lookup {token}: {cause}"),
            Self::SkippedDueToDependency { resource, root } => {
                write!(f, "{resource}: skipped, depends on failed {root}")
            }
            Self::Cancelled { resource } => write!(f, "{resource}: cancelled before dispatch"),
        }
    }
}

/// A root failure and the nodes skipped because of it.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalChain<'a> {
    pub root: &'a Failure,
    pub skipped: Vec<&'a ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutcome {
    pub resource: ResourceId,
    pub status: NodeStatus,
}

/// Result of one engine run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stack: String,
    pub run_id: String,
    /// Every node, in declaration order
    pub outcomes: Vec<NodeOutcome>,
    /// Every terminal failure, in the order it was observed
    pub failures: Vec<Failure>,
    pub cancelled: bool,
    #[serde(rename = "duration_ms", serialize_with = "millis")]
    pub duration: Duration,
    pub exports: ExportReport,
    #[serde(skip)]
    pub events: EventLog,
}

fn millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn status(&self, resource: &ResourceId) -> Option<NodeStatus> {
        self.outcomes
            .iter()
            .find(|outcome| &outcome.resource == resource)
            .map(|outcome| outcome.status)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn root_failures(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(|f| f.is_root())
    }

    /// Group skipped nodes under their root failure.
    ///
    /// Lookup failures appear with no skips: a lookup only surfaces through
    /// the input of the node that consumes it.
    pub fn causal_chains(&self) -> Vec<CausalChain<'_>> {
        self.root_failures()
            .map(|root| {
                let skipped = match root.resource() {
                    Some(origin) => self
                        .failures
                        .iter()
                        .filter_map(|f| match f {
                            Failure::SkippedDueToDependency { resource, root } if root == origin => {
                                Some(resource)
                            }
                            _ => None,
                        })
                        .collect(),
                    None => Vec::new(),
                };
                CausalChain { root, skipped }
            })
            .collect()
    }

    /// `Ok` if the run fully succeeded; otherwise `Cancelled` or `RunFailed`.
    pub fn ensure_success(&self) -> Result<()> {
        if self.cancelled {
            return Err(WeftError::Cancelled {
                stack: self.stack.clone(),
            });
        }
        if !self.failures.is_empty() {
            return Err(WeftError::RunFailed {
                stack: self.stack.clone(),
                failures: self.failures.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("test:index/node", name)
    }

    fn report(failures: Vec<Failure>, cancelled: bool) -> RunReport {
        RunReport {
            stack: "dev".into(),
            run_id: "run-1".into(),
            outcomes: vec![],
            failures,
            cancelled,
            duration: Duration::from_millis(5),
            exports: ExportReport::default(),
            events: EventLog::new(),
        }
    }

    #[test]
    fn test_causal_chains_group_skips_by_root() {
        let r = report(
            vec![
                Failure::Provisioning {
                    resource: id("db"),
                    cause: ProvisionError::invalid_input("bad size"),
                },
                Failure::SkippedDueToDependency {
                    resource: id("app"),
                    root: id("db"),
                },
                Failure::Provisioning {
                    resource: id("cdn"),
                    cause: ProvisionError::unavailable("edge down"),
                },
                Failure::SkippedDueToDependency {
                    resource: id("dns"),
                    root: id("db"),
                },
            ],
            false,
        );
        let chains = r.causal_chains();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].root.resource(), Some(&id("db")));
        assert_eq!(chains[0].skipped, vec![&id("app"), &id("dns")]);
        assert!(chains[1].skipped.is_empty());
    }

    #[test]
    fn test_ensure_success() {
        assert!(report(vec![], false).ensure_success().is_ok());
        let failed = report(
            vec![Failure::Cancelled { resource: id("a") }],
            false,
        );
        assert!(matches!(
            failed.ensure_success(),
            Err(WeftError::RunFailed { failures: 1, .. })
        ));
        assert!(matches!(
            report(vec![], true).ensure_success(),
            Err(WeftError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(Failure::SkippedDueToDependency {
            resource: id("app"),
            root: id("db"),
        })
        .unwrap();
        assert_eq!(json["kind"], "skipped_due_to_dependency");
        assert_eq!(json["root"], "test:index/node::db");
    }
}
