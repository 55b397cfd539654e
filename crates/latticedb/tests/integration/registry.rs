//! Registry lifecycle: create, get, drop, reopen.

use std::fs;
use std::sync::Arc;

use latticedb::registry::{Manifest, MANIFEST_FILE};
use latticedb::{CollectionConfig, CollectionRegistry, DistanceMetric, Error, HnswConfig};

use crate::{open_registry, test_config};

fn read_manifest(dir: &tempfile::TempDir) -> Manifest {
    let bytes = fs::read(dir.path().join(MANIFEST_FILE)).expect("failed to read manifest");
    serde_json::from_slice(&bytes).expect("failed to parse manifest")
}

// ============================================================================
// Get or create
// ============================================================================

#[test]
fn test_get_or_create_returns_same_collection() {
    let (dir, registry) = open_registry();
    let first = registry.get_or_create("c", 2, DistanceMetric::Cosine).expect("failed");
    let second = registry.get_or_create("c", 2, DistanceMetric::Cosine).expect("failed");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &registry.get("c").expect("failed")));
    assert_eq!(registry.list(), vec!["c"]);
    assert_eq!(read_manifest(&dir).collections.len(), 1);
}

#[test]
fn test_get_or_create_config_mismatch() {
    let (_dir, registry) = open_registry();
    registry.get_or_create("c", 2, DistanceMetric::Cosine).expect("failed");

    assert!(matches!(
        registry.get_or_create("c", 3, DistanceMetric::Cosine),
        Err(Error::ConfigMismatch(_))
    ));
    assert!(matches!(
        registry.get_or_create("c", 2, DistanceMetric::Euclidean),
        Err(Error::ConfigMismatch(_))
    ));

    // HNSW parameters of an existing collection are not compared.
    let config = CollectionConfig::new(2, DistanceMetric::Cosine).with_hnsw(HnswConfig::new(48));
    let existing = registry.get_or_create_with_config("c", config).expect("failed");
    assert_eq!(existing.config().hnsw.m, 16);
}

#[test]
fn test_get_missing_collection() {
    let (_dir, registry) = open_registry();
    assert!(matches!(registry.get("nope"), Err(Error::NotFound(_))));
    assert!(!registry.contains("nope"));
    assert!(matches!(registry.drop_collection("nope"), Err(Error::NotFound(_))));
}

#[test]
fn test_create_with_custom_hnsw() {
    let (dir, registry) = open_registry();
    let config = CollectionConfig::new(8, DistanceMetric::DotProduct)
        .with_hnsw(HnswConfig::new(8).with_ef_construction(64).with_ef_search(32));
    let c = registry.create_with_config("tuned", config).expect("failed");
    assert_eq!(c.config().hnsw.ef_search, 32);

    let entry = &read_manifest(&dir).collections["tuned"];
    assert_eq!(entry.dimension, 8);
    assert_eq!(entry.metric, DistanceMetric::DotProduct);
    assert_eq!(entry.hnsw.m, 8);
    assert_eq!(entry.hnsw.ef_construction, 64);
}

// ============================================================================
// Drop
// ============================================================================

#[test]
fn test_drop_collection() {
    let (dir, registry) = open_registry();
    let c = registry.create("gone", 2, DistanceMetric::Euclidean).expect("failed");
    c.add(&["a"], &[[1.0, 1.0]], &["x"]).expect("failed");
    registry.create("kept", 2, DistanceMetric::Euclidean).expect("failed");

    registry.drop_collection("gone").expect("failed");

    assert!(!registry.contains("gone"));
    assert_eq!(registry.list(), vec!["kept"]);
    assert!(!dir.path().join("gone").exists());
    assert!(!read_manifest(&dir).collections.contains_key("gone"));

    // Handles taken before the drop stop working.
    assert!(matches!(c.get("a"), Err(Error::NotFound(_))));
    assert!(matches!(c.query(&[1.0, 1.0], 1), Err(Error::NotFound(_))));

    // The name can be reused.
    let again = registry.create("gone", 3, DistanceMetric::Cosine).expect("failed");
    assert_eq!(again.count(), 0);
    assert_eq!(again.config().dimension, 3);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_reopen_restores_collections() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let a = registry.create("alpha", 2, DistanceMetric::Euclidean).expect("failed");
        a.add(&["x", "y"], &[[0.0, 0.0], [3.0, 4.0]], &["X", "Y"]).expect("failed");
        registry.create("beta", 5, DistanceMetric::Cosine).expect("failed");
        registry.close().expect("failed");
    }

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    assert_eq!(registry.list(), vec!["alpha", "beta"]);

    let a = registry.get("alpha").expect("failed");
    assert_eq!(a.count(), 2);
    assert_eq!(a.config().metric, DistanceMetric::Euclidean);
    let results = a.query(&[3.0, 4.0], 1).expect("failed");
    assert_eq!(results[0].id, "y");
    assert_eq!(results[0].payload, b"Y");
    assert_eq!(registry.get("beta").expect("failed").config().dimension, 5);

    // Closing recorded the entry point.
    assert!(read_manifest(&dir).collections["alpha"].entry_point.is_some());
}

#[test]
fn test_missing_root_is_created_or_rejected() {
    let dir = tempfile::tempdir().expect("failed");
    let root = dir.path().join("nested").join("db");
    let mut config = test_config(&dir);
    config.path = root.clone();

    assert!(matches!(
        CollectionRegistry::open(config.clone().with_create_if_missing(false)),
        Err(Error::NotFound(_))
    ));
    CollectionRegistry::open(config).expect("failed");
    assert!(root.join(MANIFEST_FILE).exists());
}

#[test]
fn test_unreadable_manifest_is_fatal() {
    let dir = tempfile::tempdir().expect("failed");
    fs::write(dir.path().join(MANIFEST_FILE), b"not json at all").expect("failed");
    assert!(matches!(CollectionRegistry::open(test_config(&dir)), Err(Error::Manifest(_))));
}

#[test]
fn test_config_from_toml_opens_registry() {
    let dir = tempfile::tempdir().expect("failed");
    let toml = format!(
        "path = {:?}\ncheckpoint_every = 2\n\n[store]\nsync_mode = \"none\"\n\n[hnsw]\nm = 8\n",
        dir.path().display().to_string()
    );
    let config = latticedb::Config::from_toml_str(&toml).expect("failed");
    let registry = CollectionRegistry::open(config).expect("failed");
    let c = registry.create("from_toml", 2, DistanceMetric::Euclidean).expect("failed");
    assert_eq!(c.config().hnsw.m, 8);

    c.add(&["a", "b"], &[[0.0, 0.0], [1.0, 1.0]], &["", ""]).expect("failed");
    assert!(dir.path().join("from_toml").join("graph.snap").exists());
}
