//! ResourceId - stable identity of a declared resource (type + logical name)
//!
//! Uses Arc<str> for zero-cost cloning: ids are copied into every
//! dependency set, graph edge and event.

use std::fmt;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of a resource node: its type token plus logical name.
///
/// Rendered as `type::name`, e.g. `aws:ec2/vpc::main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    kind: Arc<str>,
    name: Arc<str>,
}

impl ResourceId {
    pub fn new(kind: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            kind: Arc::from(kind.as_ref()),
            name: Arc::from(name.as_ref()),
        }
    }

    /// Type token (`aws:ec2/vpc`)
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Logical name (`main`)
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind, self.name)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = String;

    /// Parse `type::name`; the name is everything after the last `::`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once("::") {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => Ok(Self::new(kind, name)),
            _ => Err(format!("invalid resource id '{s}': expected 'type::name'")),
        }
    }
}

impl From<&ResourceId> for ResourceId {
    fn from(id: &ResourceId) -> Self {
        id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_kind_and_name() {
        let id = ResourceId::new("aws:ec2/vpc", "main");
        assert_eq!(id.to_string(), "aws:ec2/vpc::main");
        assert_eq!(id.kind(), "aws:ec2/vpc");
        assert_eq!(id.name(), "main");
    }

    #[test]
    fn same_name_different_kind_is_distinct() {
        let a = ResourceId::new("aws:s3/bucket", "site");
        let b = ResourceId::new("aws:cloudfront/distribution", "site");
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_string() {
        let id = ResourceId::new("k8s:apps/v1:Deployment", "web");
        assert_eq!(
            serde_json::to_value(&id).unwrap(),
            serde_json::json!("k8s:apps/v1:Deployment::web")
        );
    }

    #[test]
    fn parses_back_from_display_form() {
        let id: ResourceId = "aws:ec2/vpc::main".parse().unwrap();
        assert_eq!(id, ResourceId::new("aws:ec2/vpc", "main"));
        assert!("no-separator".parse::<ResourceId>().is_err());
        assert!("kind::".parse::<ResourceId>().is_err());
    }
}
