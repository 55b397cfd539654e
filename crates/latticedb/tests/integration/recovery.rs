//! Reopening collections after clean shutdowns, crashes and damaged files.

use std::fs::{self, OpenOptions};

use latticedb::{CollectionRegistry, DistanceMetric, Error};

use crate::test_config;

fn segment_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .expect("failed to list store")
        .map(|e| e.expect("failed").path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "seg"))
        .collect();
    files.sort();
    files
}

#[test]
fn test_reopen_without_close_replays_store() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let c = registry.create("c", 2, DistanceMetric::Euclidean).expect("failed");
        c.add(&["a", "b", "c"], &[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]], &["A", "B", "C"])
            .expect("failed");
        c.delete(&["b"]).expect("failed");
        // Dropped without close: no checkpoint, no snapshot.
    }

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    let c = registry.get("c").expect("failed");
    assert_eq!(c.count(), 2);
    assert!(matches!(c.get("b"), Err(Error::NotFound(_))));
    let results = c.query(&[1.0, 0.0], 3).expect("failed");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.id != "b"));
}

#[test]
fn test_writes_after_checkpoint_survive() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let c = registry.create("c", 2, DistanceMetric::Euclidean).expect("failed");
        c.add(&["a", "b"], &[[0.0, 0.0], [5.0, 5.0]], &["A", "B"]).expect("failed");
        c.checkpoint().expect("failed");
        c.upsert(&["a"], &[[4.0, 4.0]], &["A2"]).expect("failed");
        c.add(&["z"], &[[-3.0, -3.0]], &["Z"]).expect("failed");
    }

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    let c = registry.get("c").expect("failed");
    assert_eq!(c.count(), 3);
    assert_eq!(c.stats().index.live, 3);

    let results = c.query(&[4.0, 4.0], 1).expect("failed");
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].payload, b"A2");
    assert_eq!(c.query(&[-3.0, -3.0], 1).expect("failed")[0].id, "z");
}

#[test]
fn test_missing_snapshot_is_rebuilt() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let c = registry.create("c", 2, DistanceMetric::Euclidean).expect("failed");
        c.add(&["a", "b"], &[[0.0, 0.0], [5.0, 5.0]], &["A", "B"]).expect("failed");
        registry.close().expect("failed");
    }
    fs::remove_file(dir.path().join("c").join("graph.snap")).expect("failed");

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    let c = registry.get("c").expect("failed");
    assert_eq!(c.stats().index.live, 2);
    assert_eq!(c.query(&[5.0, 5.0], 1).expect("failed")[0].id, "b");
}

#[test]
fn test_corrupt_snapshot_is_rebuilt() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let c = registry.create("c", 2, DistanceMetric::Euclidean).expect("failed");
        c.add(&["a", "b"], &[[0.0, 0.0], [5.0, 5.0]], &["A", "B"]).expect("failed");
        registry.close().expect("failed");
    }
    let snapshot = dir.path().join("c").join("graph.snap");
    let mut bytes = fs::read(&snapshot).expect("failed");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&snapshot, bytes).expect("failed");

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    let c = registry.get("c").expect("failed");
    assert_eq!(c.stats().index.live, 2);
    assert_eq!(c.query(&[0.0, 0.0], 1).expect("failed")[0].id, "a");
}

#[test]
fn test_torn_tail_loses_only_last_write() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let c = registry.create("c", 2, DistanceMetric::Euclidean).expect("failed");
        for i in 0..5 {
            c.add(&[format!("r{i}")], &[[i as f32, 0.0]], &["payload"]).expect("failed");
        }
    }

    let segments = segment_files(&dir.path().join("c").join("store"));
    let last = segments.last().expect("no segment files");
    let len = fs::metadata(last).expect("failed").len();
    OpenOptions::new().write(true).open(last).expect("failed").set_len(len - 3).expect("failed");

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    let c = registry.get("c").expect("failed");
    assert_eq!(c.count(), 4);
    assert!(!c.contains("r4"));
    for i in 0..4 {
        assert!(c.contains(&format!("r{i}")));
    }
    assert_eq!(c.stats().index.live, 4);

    // The collection keeps working after recovery.
    c.add(&["r4"], &[[4.0, 0.0]], &["again"]).expect("failed");
    assert_eq!(c.query(&[4.0, 0.0], 1).expect("failed")[0].payload, b"again");
}

#[test]
fn test_compaction_survives_reopen() {
    let dir = tempfile::tempdir().expect("failed");
    {
        let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
        let c = registry.create("c", 2, DistanceMetric::Euclidean).expect("failed");
        let ids: Vec<String> = (0..30).map(|i| format!("r{i}")).collect();
        let vectors: Vec<[f32; 2]> = (0..30).map(|i| [i as f32, 1.0]).collect();
        c.add(&ids, &vectors, &vec!["p"; 30]).expect("failed");
        c.delete(&ids[..20]).expect("failed");
        c.compact().expect("failed");
        c.add(&["new"], &[[100.0, 1.0]], &["n"]).expect("failed");
    }

    let registry = CollectionRegistry::open(test_config(&dir)).expect("failed");
    let c = registry.get("c").expect("failed");
    assert_eq!(c.count(), 11);
    assert!(!c.contains("r0"));
    assert!(c.contains("r25"));
    assert_eq!(c.query(&[99.0, 1.0], 1).expect("failed")[0].id, "new");
    assert_eq!(c.stats().index.tombstoned, 0);
}
