//! Test fixtures and helpers

#![allow(dead_code)]

use std::path::PathBuf;

use weft::ResourceId;

/// Resource type used by engine tests
pub const NODE: &str = "test:index/node";

/// Get path to test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Get path to a specific fixture file
pub fn fixture(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Id of a test node
pub fn node(name: &str) -> ResourceId {
    ResourceId::new(NODE, name)
}

/// A manifest with no resources
pub fn empty_manifest_yaml() -> &'static str {
    "name: empty\n"
}
