//! # Collaborator Contracts
//!
//! The engine performs no provisioning itself. It hands fully resolved
//! inputs to external collaborators and feeds their results back into the
//! graph:
//!
//! - [`Provisioner`] - create/read/update one resource, return its outputs
//! - [`Lookup`] - read-only query independent of any resource
//! - [`MockProvisioner`] - in-memory implementation of both, for tests and
//!   `weft simulate`
//!
//! Both report failures as [`ProvisionError`]: a human-readable message plus
//! an [`ErrorCategory`](crate::error::ErrorCategory). Retry and timeout
//! policy belong to the collaborator; the engine only observes the outcome.
//!
//! ```rust
//! use weft::provider::{MockProvisioner, ProvisionRequest, Provisioner, ResolvedInputs};
//! use weft::resource::ResourceId;
//!
//! # tokio_test_block(async {
//! let mock = MockProvisioner::new();
//! let request = ProvisionRequest {
//!     resource: ResourceId::new("aws:s3/bucket", "site"),
//!     inputs: ResolvedInputs::default(),
//! };
//! let outputs = mock.provision(request).await.unwrap();
//! assert_eq!(outputs["id"], "site-id");
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod mock;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProvisionError;
use crate::resource::{Outputs, ResourceId};

pub use mock::MockProvisioner;

/// Placeholder reported in place of a secret value.
pub const REDACTED: &str = "[secret]";

/// Input attributes after resolution: no deferred values left.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedInputs {
    pub values: BTreeMap<String, Value>,
    /// Names of attributes whose value was secret-tainted
    pub secrets: BTreeSet<String>,
}

impl ResolvedInputs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.secrets.contains(name)
    }

    /// Inputs as a JSON object with secret attributes replaced by [`REDACTED`].
    pub fn redacted(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| {
                    let shown = if self.secrets.contains(name) {
                        Value::String(REDACTED.to_string())
                    } else {
                        value.clone()
                    };
                    (name.clone(), shown)
                })
                .collect(),
        )
    }
}

/// One provisioning operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionRequest {
    pub resource: ResourceId,
    pub inputs: ResolvedInputs,
}

/// One read-only lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupRequest {
    /// Function token, e.g. `aws:ec2/getVpc`
    pub token: String,
    pub args: Value,
}

/// Provisioning collaborator.
///
/// Invoked exactly once per resource, and only after every dependency of
/// that resource has resolved.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, request: ProvisionRequest) -> Result<Outputs, ProvisionError>;
}

/// Lookup collaborator.
#[async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup(&self, request: LookupRequest) -> Result<Value, ProvisionError>;
}
