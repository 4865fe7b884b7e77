//! Manifest model - serde view of a YAML stack file
//!
//! ```yaml
//! name: web
//! components:
//!   - name: network
//!     type: acme:net/network
//!     outputs:
//!       vpcId: ${vpc.id}
//! lookups:
//!   - name: ami
//!     function: aws:ec2/getAmi
//!     arguments: { owners: [amazon] }
//! resources:
//!   - name: vpc
//!     type: aws:ec2/vpc
//!     parent: network
//!     properties: { cidrBlock: 10.0.0.0/16 }
//!   - name: server
//!     type: aws:ec2/instance
//!     properties:
//!       ami: ${ami.id}
//!       subnetTag: "subnet-of-${vpc.id}"
//!     dependsOn: [network]
//! exports:
//!   - name: vpcId
//!     value: ${vpc.id}
//! ```
//!
//! Expression values stay untyped JSON until they are compiled against the
//! names in scope (see `template`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentDecl>,
    #[serde(default)]
    pub lookups: Vec<LookupDecl>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub exports: Vec<ExportDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComponentDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LookupDecl {
    pub name: String,
    /// Function token, e.g. `aws:ec2/getVpc`
    pub function: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub secret_outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportDecl {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub secret: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_manifest() {
        let manifest: Manifest = serde_yaml::from_str("name: empty").unwrap();
        assert_eq!(manifest.name, "empty");
        assert!(manifest.resources.is_empty());
    }

    #[test]
    fn test_camel_case_fields() {
        let yaml = r#"
name: dev
resources:
  - name: db
    type: aws:rds/instance
    dependsOn: [vpc]
    secretOutputs: [password]
    properties:
      size: 20
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        let db = &manifest.resources[0];
        assert_eq!(db.kind, "aws:rds/instance");
        assert_eq!(db.depends_on, vec!["vpc"]);
        assert_eq!(db.secret_outputs, vec!["password"]);
        assert_eq!(db.properties["size"], 20);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let yaml = "name: dev\nresources:\n  - name: a\n    type: t\n    depends_on: [b]\n";
        assert!(serde_yaml::from_str::<Manifest>(yaml).is_err());
    }
}
