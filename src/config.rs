//! Weft Configuration Module
//!
//! Engine settings, stored in `~/.config/weft/config.toml`:
//!
//! ```toml
//! max_concurrency = 8
//! reveal_secrets = false
//! ```
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Command-line flags
//! 2. Environment variables (`WEFT_MAX_CONCURRENCY`, `WEFT_REVEAL_SECRETS`)
//! 3. Config file
//! 4. Defaults (no concurrency cap, secrets redacted)

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

pub const ENV_MAX_CONCURRENCY: &str = "WEFT_MAX_CONCURRENCY";
pub const ENV_REVEAL_SECRETS: &str = "WEFT_REVEAL_SECRETS";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Cap on collaborator calls in flight at once; `None` means unbounded
    pub max_concurrency: Option<NonZeroUsize>,

    /// Report secret exports in clear text
    pub reveal_secrets: bool,
}

impl EngineConfig {
    /// Returns `~/.config/weft/` on Unix, `%APPDATA%/weft/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weft")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit file (must exist).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| WeftError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| WeftError::Config {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = var(ENV_MAX_CONCURRENCY).filter(|v| !v.is_empty()) {
            let parsed = raw.trim().parse::<NonZeroUsize>().map_err(|_| WeftError::Config {
                reason: format!("{ENV_MAX_CONCURRENCY} must be a positive integer, got '{raw}'"),
            })?;
            self.max_concurrency = Some(parsed);
        }

        if let Some(raw) = var(ENV_REVEAL_SECRETS).filter(|v| !v.is_empty()) {
            self.reveal_secrets = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(WeftError::Config {
                        reason: format!("{ENV_REVEAL_SECRETS} must be a boolean, got '{raw}'"),
                    })
                }
            };
        }

        Ok(self)
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = NonZeroUsize::new(limit);
        self
    }

    pub fn with_reveal_secrets(mut self, reveal: bool) -> Self {
        self.reveal_secrets = reveal;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_path_contains_weft() {
        let path = EngineConfig::config_path();
        assert!(path.to_string_lossy().contains("weft"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_parse_toml() {
        let config =
            EngineConfig::from_toml_str("max_concurrency = 4\nreveal_secrets = true\n").unwrap();
        assert_eq!(config.max_concurrency, NonZeroUsize::new(4));
        assert!(config.reveal_secrets);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = EngineConfig::from_toml_str("max_concurrency = 0").unwrap_err();
        assert!(err.to_string().contains("WEFT-020"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_concurrency = 2").unwrap();
        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.max_concurrency, NonZeroUsize::new(2));
        assert!(!config.reveal_secrets);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = EngineConfig::default()
            .with_max_concurrency(8)
            .with_vars(vars(&[
                (ENV_MAX_CONCURRENCY, "3"),
                (ENV_REVEAL_SECRETS, "yes"),
            ]))
            .unwrap();
        assert_eq!(config.max_concurrency, NonZeroUsize::new(3));
        assert!(config.reveal_secrets);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let err = EngineConfig::default()
            .with_vars(vars(&[(ENV_REVEAL_SECRETS, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, WeftError::Config { .. }));
    }

    #[test]
    fn test_zero_limit_means_unbounded() {
        assert_eq!(EngineConfig::default().with_max_concurrency(0).max_concurrency, None);
    }
}
