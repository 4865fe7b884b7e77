//! Template compilation - `${name}` / `${name.attr.path}` references
//!
//! An expression (untyped JSON from the manifest) compiles to one
//! `DeferredValue<Value>`:
//! - a string that is exactly one reference keeps the referenced JSON type
//! - a string mixing text and references concatenates to a string
//! - arrays and objects combine their members
//! - `{ "fn::secret": expr }` marks `expr` secret
//!
//! Expressions with no references compile to literals.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::error::{Result, WeftError};
use crate::resource::ResourceHandle;
use crate::value::DeferredValue;

/// Pre-compiled regex for `${name}` or `${name.attr.path}`
static REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][\w-]*(?:\.[\w-]+)*)\s*\}").unwrap()
});

const SECRET_FN: &str = "fn::secret";

/// A name an expression can reference.
#[derive(Debug, Clone)]
pub enum Binding {
    Resource(ResourceHandle),
    Lookup(DeferredValue<Value>),
}

/// Names visible to expressions.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: FxHashMap<String, Binding>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.insert(name.into(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceHandle> {
        match self.bindings.get(name) {
            Some(Binding::Resource(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Compile one expression. `location` names it in errors.
    pub fn compile(&self, expr: &Value, location: &str) -> Result<DeferredValue<Value>> {
        match expr {
            Value::String(s) => self.compile_string(s, location),
            Value::Array(items) => {
                let values = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.compile(item, &format!("{location}[{i}]")))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DeferredValue::combine_all(values).map(Value::Array))
            }
            Value::Object(map) if map.len() == 1 && map.contains_key(SECRET_FN) => {
                let inner = &map[SECRET_FN];
                Ok(self.compile(inner, location)?.as_secret())
            }
            Value::Object(map) => {
                let keys: Vec<String> = map.keys().cloned().collect();
                let values = map
                    .iter()
                    .map(|(key, value)| self.compile(value, &format!("{location}.{key}")))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DeferredValue::combine_all(values).map(move |values| {
                    Value::Object(keys.into_iter().zip(values).collect::<Map<String, Value>>())
                }))
            }
            literal => Ok(DeferredValue::of(literal.clone())),
        }
    }

    fn compile_string(&self, s: &str, location: &str) -> Result<DeferredValue<Value>> {
        let mut refs = REF_RE.captures_iter(s).peekable();
        if refs.peek().is_none() {
            return Ok(DeferredValue::of(Value::String(s.to_string())));
        }

        // Whole string is a single reference: keep the JSON type
        if let Some(cap) = REF_RE.captures(s) {
            if let Some(m) = cap.get(0) {
                if m.start() == 0 && m.end() == s.len() {
                    return self.reference(&cap[1], location);
                }
            }
        }

        let mut parts: Vec<DeferredValue<String>> = Vec::new();
        let mut last_end = 0;
        for cap in refs {
            let Some(m) = cap.get(0) else { continue };
            if m.start() > last_end {
                parts.push(DeferredValue::of(s[last_end..m.start()].to_string()));
            }
            parts.push(self.reference(&cap[1], location)?.map(|v| value_to_string(&v)));
            last_end = m.end();
        }
        if last_end < s.len() {
            parts.push(DeferredValue::of(s[last_end..].to_string()));
        }
        Ok(DeferredValue::concat(parts).map(Value::String))
    }

    /// Resolve `name.attr.path` to a deferred value.
    fn reference(&self, path: &str, location: &str) -> Result<DeferredValue<Value>> {
        let mut segments = path.split('.');
        let name = segments.next().unwrap_or_default();
        let rest: Vec<String> = segments.map(str::to_string).collect();

        let (base, rest) = match self.bindings.get(name) {
            Some(Binding::Resource(handle)) => match rest.split_first() {
                Some((attr, rest)) => (handle.output(attr), rest.to_vec()),
                None => (handle.outputs(), Vec::new()),
            },
            Some(Binding::Lookup(value)) => (value.clone(), rest),
            None => {
                return Err(WeftError::UnknownReference {
                    name: name.to_string(),
                    location: location.to_string(),
                })
            }
        };

        if rest.is_empty() {
            return Ok(base);
        }
        let full = path.to_string();
        Ok(base.try_map(move |value| navigate(&value, &rest, &full)))
    }
}

/// Follow `segments` into `value`; numeric segments index arrays.
fn navigate(value: &Value, segments: &[String], full: &str) -> std::result::Result<Value, String> {
    let mut current = value;
    for segment in segments {
        let next = match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(segment.as_str()),
            _ => None,
        };
        current = next.ok_or_else(|| format!("'{full}': no field '{segment}'"))?;
    }
    Ok(current.clone())
}

/// Strings interpolate raw; everything else as JSON text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
