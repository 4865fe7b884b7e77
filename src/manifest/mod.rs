//! Manifest Module - YAML stack files
//!
//! Turns a declarative manifest into a [`Stack`]:
//! 1. every component and resource gets a forward handle, so any section may
//!    reference a resource declared further down
//! 2. lookups, in file order (a lookup may reference earlier lookups only)
//! 3. components, then resources
//! 4. exports
//!
//! Names are unique across components, lookups and resources.

mod model;
mod template;

use std::fs;
use std::path::Path;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::{Result, WeftError};
use crate::resource::{ComponentSpec, ResourceId, ResourceSpec};
use crate::stack::Stack;

pub use model::{ComponentDecl, ExportDecl, LookupDecl, Manifest, ResourceDecl};
pub use template::{Binding, Scope};

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| WeftError::ManifestParse {
            details: e.to_string(),
        })
    }

    /// Declare everything in a fresh stack. Call `build()` on the result to
    /// validate the graph.
    pub fn to_stack(&self) -> Result<Stack> {
        self.check_names()?;

        let mut stack = Stack::new(&self.name);
        let mut scope = Scope::new();

        for decl in &self.components {
            scope.insert(
                &decl.name,
                Binding::Resource(stack.reference(&decl.kind, &decl.name)),
            );
        }
        for decl in &self.resources {
            scope.insert(
                &decl.name,
                Binding::Resource(stack.reference(&decl.kind, &decl.name)),
            );
        }

        for decl in &self.lookups {
            let args = scope.compile(&decl.arguments, &format!("lookups.{}.arguments", decl.name))?;
            let result = stack.lookup(&decl.function, args);
            scope.insert(&decl.name, Binding::Lookup(result));
        }

        for decl in &self.components {
            let location = format!("components.{}", decl.name);
            let mut spec = ComponentSpec::new(&decl.kind, &decl.name);
            if let Some(parent) = &decl.parent {
                spec = spec.parent(resolve_id(&scope, parent, &location)?);
            }
            for dep in &decl.depends_on {
                spec = spec.depends_on(resolve_id(&scope, dep, &location)?);
            }
            let handle = stack.component(spec)?;

            let mut outputs = Vec::with_capacity(decl.outputs.len());
            for (name, expr) in &decl.outputs {
                outputs.push((name.clone(), scope.compile(expr, &format!("{location}.outputs.{name}"))?));
            }
            stack.register_outputs(&handle, outputs)?;
        }

        for decl in &self.resources {
            let location = format!("resources.{}", decl.name);
            let mut spec = ResourceSpec::new(&decl.kind, &decl.name);
            for (name, expr) in &decl.properties {
                spec = spec.input(
                    name.clone(),
                    scope.compile(expr, &format!("{location}.properties.{name}"))?,
                );
            }
            for dep in &decl.depends_on {
                spec = spec.depends_on(resolve_id(&scope, dep, &location)?);
            }
            if let Some(parent) = &decl.parent {
                spec = spec.parent(resolve_id(&scope, parent, &location)?);
            }
            for name in &decl.secret_outputs {
                spec = spec.secret_output(name.clone());
            }
            stack.resource(spec)?;
        }

        for decl in &self.exports {
            let value = scope.compile(&decl.value, &format!("exports.{}", decl.name))?;
            let value = if decl.secret { value.as_secret() } else { value };
            stack.export(&decl.name, value)?;
        }

        debug!(
            stack = %self.name,
            resources = self.resources.len(),
            components = self.components.len(),
            lookups = self.lookups.len(),
            "manifest declared"
        );
        Ok(stack)
    }

    fn check_names(&self) -> Result<()> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let names = self
            .components
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.lookups.iter().map(|l| l.name.as_str()))
            .chain(self.resources.iter().map(|r| r.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(WeftError::ManifestInvalid {
                    reason: format!("name '{name}' is declared more than once"),
                });
            }
        }
        Ok(())
    }
}

/// Map a `dependsOn`/`parent` name to a resource id.
fn resolve_id(scope: &Scope, name: &str, location: &str) -> Result<ResourceId> {
    match scope.get(name) {
        Some(Binding::Resource(handle)) => Ok(handle.id().clone()),
        Some(Binding::Lookup(_)) => Err(WeftError::ManifestInvalid {
            reason: format!("{location}: '{name}' is a lookup, not a resource"),
        }),
        None => Err(WeftError::UnknownReference {
            name: name.to_string(),
            location: location.to_string(),
        }),
    }
}
