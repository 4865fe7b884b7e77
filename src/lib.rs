//! Weft - deferred-value dependency graph engine for declarative provisioning
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  value/     DeferredValue: of, map, combine_all, flat_map    │
//! │  resource/  ResourceId, ResourceSpec, ResourceHandle         │
//! │  manifest/  YAML → Stack (references, lookups, exports)      │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  stack      Declaration → validated Plan                     │
//! │  dag/       DependencyGraph (cycle check, topological order) │
//! │  runtime/   Engine (concurrent scheduler), RunReport         │
//! │  export/    Ordered export registry, secret redaction        │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  event/     Event sourcing for audit trail                   │
//! │  provider/  Provisioner + Lookup collaborators, mock         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`value`] | Single-assignment values with dependency and secret tracking |
//! | [`resource`] | Resource identity, declarations, output handles |
//! | [`stack`] | Declaration surface, graph validation into a [`Plan`] |
//! | [`dag`] | Dependency graph with FxHashMap optimization |
//! | [`runtime`] | Plan execution with tokio concurrency |
//! | [`export`] | Named stack outputs |
//! | [`manifest`] | YAML manifests with `${name.attr}` references |
//! | [`event`] | Event sourcing for audit trail |
//! | [`provider`] | Collaborator traits and the in-memory mock |
//! | [`config`] | Engine configuration (TOML + env) |
//! | [`error`] | Error types with fix suggestions |
//!
//! ## Example
//!
//! ```
//! use weft::{Engine, MockProvisioner, ResourceSpec, Stack};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut stack = Stack::new("dev");
//! let vpc = stack
//!     .resource(ResourceSpec::new("aws:ec2/vpc", "main").input("cidr", "10.0.0.0/16"))
//!     .unwrap();
//! stack
//!     .resource(ResourceSpec::new("aws:ec2/subnet", "a").input("vpcId", vpc.output("id")))
//!     .unwrap();
//! stack.export("vpcId", vpc.output("id")).unwrap();
//!
//! let report = Engine::new(MockProvisioner::shared())
//!     .run(stack.build().unwrap())
//!     .await;
//! assert!(report.is_success());
//! assert_eq!(report.exports.get("vpcId").unwrap().to_string(), "main-id");
//! # }
//! ```

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL - values, resources, manifests
// ═══════════════════════════════════════════════════════════════
pub mod manifest;
pub mod resource;
pub mod value;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - graph and execution
// ═══════════════════════════════════════════════════════════════
pub mod dag;
pub mod export;
pub mod runtime;
pub mod stack;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - events, collaborators
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod provider;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{ErrorCategory, FixSuggestion, ProvisionError, ValueError, WeftError};

// Config types
pub use config::EngineConfig;

// Domain types
pub use manifest::Manifest;
pub use resource::{ComponentSpec, Input, Outputs, ResourceHandle, ResourceId, ResourceSpec};
pub use value::{zip, DeferredValue, Dependencies, Resolver, ValueState};

// Application types
pub use dag::DependencyGraph;
pub use export::{ExportRegistry, ExportReport, ExportValue};
pub use runtime::{CausalChain, Engine, Failure, NodeOutcome, NodeStatus, RunReport};
pub use stack::{Plan, Stack};

// Infrastructure types
pub use event::{Event, EventKind, EventLog};
pub use provider::{Lookup, LookupRequest, MockProvisioner, ProvisionRequest, Provisioner};
