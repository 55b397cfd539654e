//! Integration tests for LatticeDB.
//!
//! These tests drive the public API end to end: registry lifecycle,
//! collection reads and writes, recovery after reopen, and concurrent use.

mod collection;
mod concurrency;
mod properties;
mod recovery;
mod registry;

use latticedb::{CollectionRegistry, Config, StoreConfig, SyncMode};
use tempfile::TempDir;

/// Registry config for tests: no per-write fsync.
pub fn test_config(dir: &TempDir) -> Config {
    Config::new(dir.path()).with_store(StoreConfig::default().with_sync_mode(SyncMode::None))
}

/// Open a registry in a fresh temp directory.
pub fn open_registry() -> (TempDir, CollectionRegistry) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed to open registry");
    (dir, registry)
}
