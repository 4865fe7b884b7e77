//! OutputSlots - the pending outputs of one resource
//!
//! Output values are created lazily, the first time a caller asks for an
//! attribute, and all of them settle together when the resource completes.
//! Asking after settlement yields an already-settled value.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::ValueError;
use crate::value::{DeferredValue, Resolver};

use super::ResourceId;

/// Concrete outputs reported for a resource.
pub type Outputs = Map<String, Value>;

struct Settlement {
    outcome: Result<Arc<Outputs>, ValueError>,
    secret: BTreeSet<String>,
}

struct Slots {
    /// Names declared secret up front
    secret_names: BTreeSet<String>,
    values: BTreeMap<String, DeferredValue<Value>>,
    resolvers: Vec<(String, Resolver<Value>)>,
    record: DeferredValue<Value>,
    record_resolver: Option<Resolver<Value>>,
    settled: Option<Settlement>,
}

pub(crate) struct OutputSlots {
    owner: ResourceId,
    inner: Mutex<Slots>,
}

impl OutputSlots {
    pub(crate) fn new(owner: ResourceId) -> Self {
        let (record, record_resolver) = DeferredValue::output_of(owner.clone(), false);
        Self {
            owner,
            inner: Mutex::new(Slots {
                secret_names: BTreeSet::new(),
                values: BTreeMap::new(),
                resolvers: Vec::new(),
                record,
                record_resolver: Some(record_resolver),
                settled: None,
            }),
        }
    }

    pub(crate) fn owner(&self) -> &ResourceId {
        &self.owner
    }

    /// Mark attributes secret; values already handed out are marked too.
    pub(crate) fn declare_secret<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut slots = self.inner.lock();
        for name in names {
            if let Some((_, resolver)) = slots.resolvers.iter().find(|(n, _)| *n == name) {
                resolver.mark_secret();
            }
            slots.secret_names.insert(name);
        }
        if !slots.secret_names.is_empty() {
            if let Some(resolver) = &slots.record_resolver {
                resolver.mark_secret();
            }
        }
    }

    pub(crate) fn output(&self, name: &str) -> DeferredValue<Value> {
        let mut slots = self.inner.lock();
        if let Some(value) = slots.values.get(name) {
            return value.clone();
        }

        let (value, resolver) = match &slots.settled {
            Some(settlement) => {
                let (value, resolver) =
                    DeferredValue::output_of(self.owner.clone(), settlement.secret.contains(name));
                resolver.settle(self.pick(&settlement.outcome, name));
                (value, None)
            }
            None => {
                let (value, resolver) = DeferredValue::output_of(
                    self.owner.clone(),
                    slots.secret_names.contains(name),
                );
                (value, Some(resolver))
            }
        };
        if let Some(resolver) = resolver {
            slots.resolvers.push((name.to_string(), resolver));
        }
        slots.values.insert(name.to_string(), value.clone());
        value
    }

    /// The whole output record as one JSON object.
    pub(crate) fn record(&self) -> DeferredValue<Value> {
        self.inner.lock().record.clone()
    }

    /// Settle every output. `secret_inputs` names inputs that were secret;
    /// outputs of the same name are secret as well.
    pub(crate) fn settle(
        &self,
        outcome: Result<Arc<Outputs>, ValueError>,
        secret_inputs: &BTreeSet<String>,
    ) {
        let (resolvers, record_resolver, secret) = {
            let mut slots = self.inner.lock();
            if slots.settled.is_some() {
                return;
            }
            let secret: BTreeSet<String> = slots
                .secret_names
                .iter()
                .chain(secret_inputs.iter())
                .cloned()
                .collect();
            slots.settled = Some(Settlement {
                outcome: outcome.clone(),
                secret: secret.clone(),
            });
            (
                std::mem::take(&mut slots.resolvers),
                slots.record_resolver.take(),
                secret,
            )
        };

        for (name, resolver) in resolvers {
            if secret.contains(&name) {
                resolver.mark_secret();
            }
            resolver.settle(self.pick(&outcome, &name));
        }

        if let Some(resolver) = record_resolver {
            match &outcome {
                Ok(outputs) => {
                    if outputs.keys().any(|k| secret.contains(k)) {
                        resolver.mark_secret();
                    }
                    resolver.resolve(Value::Object((**outputs).clone()));
                }
                Err(error) => resolver.fail(error.clone()),
            }
        }
    }

    fn pick(&self, outcome: &Result<Arc<Outputs>, ValueError>, name: &str) -> Result<Value, ValueError> {
        match outcome {
            Ok(outputs) => outputs
                .get(name)
                .cloned()
                .ok_or_else(|| ValueError::MissingOutput {
                    resource: self.owner.clone(),
                    attribute: name.to_string(),
                }),
            Err(error) => Err(error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::value::ValueState;

    fn slots() -> OutputSlots {
        OutputSlots::new(ResourceId::new("aws:rds/instance", "db"))
    }

    fn outputs(value: Value) -> Arc<Outputs> {
        match value {
            Value::Object(map) => Arc::new(map),
            _ => unreachable!("test outputs are objects"),
        }
    }

    #[test]
    fn same_name_returns_same_value() {
        let s = slots();
        let a = s.output("endpoint");
        let b = s.output("endpoint");
        s.settle(Ok(outputs(json!({"endpoint": "db:5432"}))), &BTreeSet::new());
        assert_eq!(a.peek(), ValueState::Resolved(json!("db:5432")));
        assert_eq!(b.peek(), ValueState::Resolved(json!("db:5432")));
    }

    #[test]
    fn outputs_depend_on_owner() {
        let s = slots();
        assert!(s.output("endpoint").dependencies().contains(s.owner()));
        assert!(s.record().dependencies().contains(s.owner()));
    }

    #[test]
    fn absent_attribute_is_missing_output() {
        let s = slots();
        let port = s.output("port");
        s.settle(Ok(outputs(json!({"endpoint": "x"}))), &BTreeSet::new());
        assert!(matches!(
            port.peek(),
            ValueState::Failed(ValueError::MissingOutput { .. })
        ));
    }

    #[test]
    fn late_request_is_already_settled() {
        let s = slots();
        s.settle(Ok(outputs(json!({"arn": "arn:db"}))), &BTreeSet::new());
        assert_eq!(s.output("arn").peek(), ValueState::Resolved(json!("arn:db")));
    }

    #[test]
    fn failure_reaches_every_output() {
        let s = slots();
        let a = s.output("endpoint");
        s.settle(Err(ValueError::Abandoned), &BTreeSet::new());
        assert_eq!(a.peek(), ValueState::Failed(ValueError::Abandoned));
        assert_eq!(s.record().peek(), ValueState::Failed(ValueError::Abandoned));
        assert_eq!(s.output("other").peek(), ValueState::Failed(ValueError::Abandoned));
    }

    #[test]
    fn declared_secret_outputs_are_secret() {
        let s = slots();
        let early = s.output("password");
        s.declare_secret(["password".to_string()]);
        assert!(early.is_secret());
        assert!(s.output("password").is_secret());
        assert!(!s.output("endpoint").is_secret());
        assert!(s.record().is_secret());
    }

    #[test]
    fn output_named_like_secret_input_is_secret() {
        let s = slots();
        let password = s.output("password");
        let secret_inputs = BTreeSet::from(["password".to_string()]);
        s.settle(
            Ok(outputs(json!({"password": "hunter2", "endpoint": "x"}))),
            &secret_inputs,
        );
        assert!(password.is_secret());
        assert!(s.output("password").is_secret());
        assert!(!s.output("endpoint").is_secret());
        assert!(s.record().is_secret());
    }
}
