//! Weft Error Types with Error Codes
//!
//! Error code ranges:
//! - WEFT-000-009: Stack construction errors (fatal, raised before any run)
//! - WEFT-010-019: Run errors
//! - WEFT-020-029: Configuration errors
//! - WEFT-030-039: Manifest errors
//!
//! Two more error types travel *inside* the graph rather than out of it:
//! - [`ProvisionError`]: what a collaborator reports for one operation
//! - [`ValueError`]: what a failed `DeferredValue` settles with

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ResourceId;

pub type Result<T> = std::result::Result<T, WeftError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Render a cycle as `a → b → c → a`.
fn format_cycle(cycle: &[ResourceId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" → ")
}

fn format_ids(ids: &[ResourceId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Error, Debug)]
pub enum WeftError {
    // ═══════════════════════════════════════════
    // STACK CONSTRUCTION (000-009)
    // ═══════════════════════════════════════════
    #[error("[WEFT-001] Resource '{resource}' is declared more than once")]
    DuplicateIdentity { resource: ResourceId },

    #[error("[WEFT-002] Export '{name}' is registered more than once")]
    DuplicateExport { name: String },

    #[error("[WEFT-003] Cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceId> },

    #[error("[WEFT-004] Resource '{resource}' depends on undeclared '{dependency}'")]
    UnknownDependency {
        resource: ResourceId,
        dependency: ResourceId,
    },

    #[error("[WEFT-005] Resource '{resource}' names '{parent}' as parent, which is not a declared component")]
    InvalidParent {
        resource: ResourceId,
        parent: ResourceId,
    },

    #[error("[WEFT-006] '{resource}' is not a component")]
    NotAComponent { resource: ResourceId },

    // ═══════════════════════════════════════════
    // RUN (010-019)
    // ═══════════════════════════════════════════
    #[error("[WEFT-010] Run of stack '{stack}' finished with {failures} failure(s)")]
    RunFailed { stack: String, failures: usize },

    #[error("[WEFT-011] Run of stack '{stack}' was cancelled")]
    Cancelled { stack: String },

    // ═══════════════════════════════════════════
    // CONFIG (020-029)
    // ═══════════════════════════════════════════
    #[error("[WEFT-020] Configuration error: {reason}")]
    Config { reason: String },

    // ═══════════════════════════════════════════
    // MANIFEST (030-039)
    // ═══════════════════════════════════════════
    #[error("[WEFT-030] Failed to parse manifest: {details}")]
    ManifestParse { details: String },

    #[error("[WEFT-031] Invalid manifest: {reason}")]
    ManifestInvalid { reason: String },

    #[error("[WEFT-032] '{location}' references unknown name '{name}'")]
    UnknownReference { name: String, location: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FixSuggestion for WeftError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            WeftError::DuplicateIdentity { .. } => {
                Some("Give each resource of the same type a distinct logical name")
            }
            WeftError::DuplicateExport { .. } => Some("Use unique export names"),
            WeftError::CyclicDependency { .. } => {
                Some("Break the cycle: remove a dependsOn entry or a reference between the listed resources")
            }
            WeftError::UnknownDependency { .. } => {
                Some("Declare the referenced resource or remove the dependency")
            }
            WeftError::InvalidParent { .. } => Some("Declare the parent with a component first"),
            WeftError::NotAComponent { .. } => {
                Some("Only components accept registered outputs")
            }
            WeftError::RunFailed { .. } => {
                Some("Inspect the root failures; skipped resources recover once their root is fixed")
            }
            WeftError::Cancelled { .. } => None,
            WeftError::Config { .. } => Some("Check ~/.config/weft/config.toml syntax"),
            WeftError::ManifestParse { .. } | WeftError::Yaml(_) => {
                Some("Check YAML syntax: indentation and quoting")
            }
            WeftError::ManifestInvalid { .. } => {
                Some("Names must be unique across components, lookups and resources")
            }
            WeftError::UnknownReference { .. } => {
                Some("Use ${name} or ${name.attribute} with a declared name")
            }
            WeftError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Collaborator errors
// ═══════════════════════════════════════════════════════════════

/// Machine-checkable category attached to a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidInput,
    ProviderUnavailable,
    AlreadyExists,
    NotFound,
    PermissionDenied,
    Timeout,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a provisioning or lookup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct ProvisionError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ProvisionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidInput, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ProviderUnavailable, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::AlreadyExists, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }

    /// Whether a collaborator might succeed on a later attempt.
    ///
    /// The engine never retries; drivers may use this to decide on a re-run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::ProviderUnavailable | ErrorCategory::Timeout
        )
    }
}

// ═══════════════════════════════════════════════════════════════
// Value errors
// ═══════════════════════════════════════════════════════════════

/// Failure carried by a `Failed` deferred value.
///
/// Cloned into every continuation of the failed value, so it must stay cheap.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("resource '{resource}' failed: {cause}")]
    Provisioning {
        resource: ResourceId,
        cause: ProvisionError,
    },

    #[error("resource '{resource}' could not resolve input '{attribute}': {cause}")]
    Input {
        resource: ResourceId,
        attribute: String,
        cause: Box<ValueError>,
    },

    #[error("lookup '{token}' failed: {cause}")]
    Lookup { token: String, cause: ProvisionError },

    #[error("resource '{resource}' returned no output '{attribute}'")]
    MissingOutput {
        resource: ResourceId,
        attribute: String,
    },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("resource '{resource}' was not provisioned: run cancelled")]
    Cancelled { resource: ResourceId },

    /// Inputs chosen at run time (e.g. inside `flat_map`) wait on each other
    #[error("inputs wait on each other at run time: {}", format_ids(.waiting))]
    DynamicCycle { waiting: Vec<ResourceId> },

    #[error("value was abandoned before it settled")]
    Abandoned,
}

impl ValueError {
    /// The resource whose failure this error originates from, if any.
    pub fn root_resource(&self) -> Option<&ResourceId> {
        match self {
            Self::Provisioning { resource, .. }
            | Self::Input { resource, .. }
            | Self::MissingOutput { resource, .. }
            | Self::Cancelled { resource } => Some(resource),
            Self::Lookup { .. }
            | Self::Transform(_)
            | Self::DynamicCycle { .. }
            | Self::Abandoned => None,
        }
    }
}
