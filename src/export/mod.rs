//! Export Registry - named values reported after a run
//!
//! Insertion order is preserved; names are unique. Draining reads each
//! value's current state, so it never waits: drain after the run completes.
//! Secret values are replaced by [`REDACTED`] unless reveal is requested.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, WeftError};
use crate::provider::REDACTED;
use crate::resource::Input;
use crate::value::{DeferredValue, ValueState};

#[derive(Debug, Clone, Default)]
pub struct ExportRegistry {
    entries: Vec<(String, DeferredValue<Value>)>,
    names: FxHashSet<String>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named export. Fails with `DuplicateExport` on a reused name.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Input>) -> Result<()> {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(WeftError::DuplicateExport { name });
        }
        self.entries.push((name, value.into().into_value()));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DeferredValue<Value>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &DeferredValue<Value>> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot every export, in registration order.
    pub fn drain(&self, reveal: bool) -> ExportReport {
        let entries = self
            .entries
            .iter()
            .map(|(name, value)| {
                let secret = value.is_secret();
                let shown = match value.peek() {
                    ValueState::Resolved(_) if secret && !reveal => ExportValue::Redacted,
                    ValueState::Resolved(v) => ExportValue::Value(v),
                    ValueState::Failed(error) => ExportValue::Failed(error.to_string()),
                    ValueState::Unresolved => ExportValue::Unresolved,
                };
                ExportEntry {
                    name: name.clone(),
                    secret,
                    value: shown,
                }
            })
            .collect();
        ExportReport { entries }
    }
}

/// Reported state of one export.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportValue {
    Value(Value),
    /// Secret value withheld
    Redacted,
    /// Error marker: the value failed
    Failed(String),
    /// Error marker: the value never settled
    Unresolved,
}

impl ExportValue {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Unresolved)
    }
}

impl fmt::Display for ExportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(Value::String(s)) => f.write_str(s),
            Self::Value(v) => write!(f, "{v}"),
            Self::Redacted => f.write_str(REDACTED),
            Self::Failed(error) => write!(f, "<error: {error}>"),
            Self::Unresolved => f.write_str("<unresolved>"),
        }
    }
}

impl Serialize for ExportValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Redacted => serializer.serialize_str(REDACTED),
            Self::Failed(error) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
            Self::Unresolved => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", "unresolved")?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportEntry {
    pub name: String,
    pub secret: bool,
    pub value: ExportValue,
}

/// Drained exports, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    entries: Vec<ExportEntry>,
}

impl ExportReport {
    pub fn get(&self, name: &str) -> Option<&ExportValue> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|entry| entry.value.is_error())
    }
}

/// Serialized as a JSON object whose keys keep registration order.
impl Serialize for ExportReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.name, &entry.value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ValueError;

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = ExportRegistry::new();
        registry.export("url", "http://a").unwrap();
        let err = registry.export("url", "http://b").unwrap_err();
        assert!(matches!(err, WeftError::DuplicateExport { ref name } if name == "url"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_keeps_insertion_order() {
        let mut registry = ExportRegistry::new();
        registry.export("zeta", 1).unwrap();
        registry.export("alpha", 2).unwrap();
        registry.export("mid", 3).unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        let report = registry.drain(false);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":2,"mid":3}"#);
    }

    #[test]
    fn test_secret_is_redacted_unless_revealed() {
        let mut registry = ExportRegistry::new();
        let password = DeferredValue::of(json!("hunter2"))
            .map(|v| v)
            .as_secret();
        registry.export("dbPassword", password).unwrap();

        let hidden = registry.drain(false);
        assert_eq!(hidden.get("dbPassword"), Some(&ExportValue::Redacted));
        assert!(hidden.entries()[0].secret);

        let shown = registry.drain(true);
        assert_eq!(
            shown.get("dbPassword"),
            Some(&ExportValue::Value(json!("hunter2")))
        );
    }

    #[test]
    fn test_failed_and_unresolved_are_error_markers() {
        let mut registry = ExportRegistry::new();
        registry
            .export("broken", DeferredValue::<Value>::failed(ValueError::Abandoned))
            .unwrap();
        let (pending, _resolver) = DeferredValue::<Value>::deferred();
        registry.export("pending", pending).unwrap();

        let report = registry.drain(false);
        assert!(report.has_errors());
        assert!(matches!(report.get("broken"), Some(ExportValue::Failed(_))));
        assert_eq!(report.get("pending"), Some(&ExportValue::Unresolved));
        assert_eq!(
            serde_json::to_value(&report).unwrap()["pending"],
            json!({"error": "unresolved"})
        );
    }

    #[test]
    fn test_failed_secret_is_not_redacted() {
        let mut registry = ExportRegistry::new();
        registry
            .export(
                "key",
                DeferredValue::<Value>::failed(ValueError::Abandoned).as_secret(),
            )
            .unwrap();
        assert!(matches!(
            registry.drain(false).get("key"),
            Some(ExportValue::Failed(_))
        ));
    }
}
