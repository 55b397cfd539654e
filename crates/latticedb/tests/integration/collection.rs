//! Collection reads and writes through the registry.

use latticedb::{DistanceMetric, Error};

use crate::open_registry;

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_dog_cat_car_euclidean() {
    let (_dir, registry) = open_registry();
    let things = registry.create("things", 2, DistanceMetric::Euclidean).expect("failed");

    things
        .add(
            &["Dog", "Cat", "Car"],
            &[[0.12, 0.45], [0.15, 0.50], [0.85, 0.20]],
            &["a dog", "a cat", "a car"],
        )
        .expect("failed");

    // |q - Cat| = sqrt(0.0005) ~ 0.0224, |q - Dog| = sqrt(0.0013) ~ 0.0361,
    // |q - Car| ~ 0.7632.
    let results = things.query(&[0.14, 0.48], 2).expect("failed");
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["Cat", "Dog"]);
    assert!((results[0].distance - 0.0224).abs() < 1e-3);
    assert!((results[1].distance - 0.0361).abs() < 1e-3);
    assert_eq!(results[0].payload, b"a cat");
    assert_eq!(results[1].payload, b"a dog");

    let all = things.query(&[0.14, 0.48], 3).expect("failed");
    assert_eq!(all[2].id, "Car");
    assert!((all[2].distance - 0.7632).abs() < 1e-3);
}

#[test]
fn test_query_returns_fewer_when_collection_is_small() {
    let (_dir, registry) = open_registry();
    let c = registry.create("small", 3, DistanceMetric::Cosine).expect("failed");
    c.add(&["x", "y"], &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], &["", ""]).expect("failed");

    let results = c.query(&[1.0, 0.1, 0.0], 10).expect("failed");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "x");
}

#[test]
fn test_query_with_explicit_ef() {
    let (_dir, registry) = open_registry();
    let c = registry.create("ef", 2, DistanceMetric::Euclidean).expect("failed");
    let ids: Vec<String> = (0..100).map(|i| format!("p{i}")).collect();
    let vectors: Vec<[f32; 2]> = (0..100).map(|i| [(i % 10) as f32, (i / 10) as f32]).collect();
    c.add(&ids, &vectors, &vec![""; 100]).expect("failed");

    let results = c.query_with_ef(&[0.0, 0.0], 3, Some(200)).expect("failed");
    let found: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(found[0], "p0");
    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn test_dot_product_ranking() {
    let (_dir, registry) = open_registry();
    let c = registry.create("dot", 2, DistanceMetric::DotProduct).expect("failed");
    c.add(&["small", "large"], &[[0.1, 0.1], [2.0, 2.0]], &["", ""]).expect("failed");

    let results = c.query(&[1.0, 1.0], 2).expect("failed");
    assert_eq!(results[0].id, "large");
    assert!((results[0].distance + 4.0).abs() < 1e-5);
}

#[test]
fn test_query_errors() {
    let (_dir, registry) = open_registry();
    let c = registry.create("errors", 2, DistanceMetric::Cosine).expect("failed");
    assert!(matches!(c.query(&[1.0, 0.0], 1), Err(Error::EmptyIndex)));

    c.add(&["a"], &[[1.0, 0.0]], &[""]).expect("failed");
    assert!(matches!(c.query(&[1.0, 0.0], 0), Err(Error::InvalidK)));
    assert!(matches!(c.query(&[0.0, 0.0], 1), Err(Error::DegenerateVector)));
    assert!(matches!(
        c.query(&[1.0, 0.0, 0.0], 1),
        Err(Error::DimensionMismatch { expected: 2, actual: 3 })
    ));
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_round_trip_get() {
    let (_dir, registry) = open_registry();
    let c = registry.create("rt", 4, DistanceMetric::Euclidean).expect("failed");
    let vector = [0.25f32, -1.5, 3.0, 1e-7];
    c.add(&["doc-1"], &[vector], &[b"{\"title\": \"hello\"}".as_slice()]).expect("failed");

    let record = c.get("doc-1").expect("failed");
    assert_eq!(record.id, "doc-1");
    assert_eq!(record.vector, vector.to_vec());
    assert_eq!(record.payload, b"{\"title\": \"hello\"}");
}

#[test]
fn test_re_adding_identical_content_is_idempotent() {
    let (_dir, registry) = open_registry();
    let c = registry.create("idem", 2, DistanceMetric::Euclidean).expect("failed");
    c.add(&["a", "b"], &[[1.0, 2.0], [3.0, 4.0]], &["A", "B"]).expect("failed");
    c.add(&["a", "b"], &[[1.0, 2.0], [3.0, 4.0]], &["A", "B"]).expect("failed");

    assert_eq!(c.count(), 2);
    assert_eq!(c.peek(usize::MAX).expect("failed").len(), 2);
    assert_eq!(c.stats().store.dead_bytes, 0);
}

#[test]
fn test_add_with_different_content_is_duplicate() {
    let (_dir, registry) = open_registry();
    let c = registry.create("dup", 2, DistanceMetric::Euclidean).expect("failed");
    c.add(&["a"], &[[1.0, 2.0]], &["A"]).expect("failed");

    assert!(matches!(c.add(&["a"], &[[1.0, 2.0]], &["changed"]), Err(Error::DuplicateId(_))));
    assert!(matches!(
        c.add(&["n", "n"], &[[0.0, 1.0], [0.0, 1.0]], &["", ""]),
        Err(Error::DuplicateId(_))
    ));
    assert_eq!(c.get("a").expect("failed").payload, b"A");
    assert!(!c.contains("n"));
}

#[test]
fn test_upsert_replaces_vector_and_payload() {
    let (_dir, registry) = open_registry();
    let c = registry.create("up", 2, DistanceMetric::Euclidean).expect("failed");
    c.add(&["a", "b"], &[[0.0, 0.0], [10.0, 0.0]], &["a1", "b1"]).expect("failed");
    c.upsert(&["a", "z"], &[[10.0, 1.0], [-5.0, -5.0]], &["a2", "z1"]).expect("failed");

    assert_eq!(c.count(), 3);
    let results = c.query(&[10.0, 1.0], 1).expect("failed");
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].payload, b"a2");
    assert_eq!(c.get("a").expect("failed").vector, vec![10.0, 1.0]);
}

#[test]
fn test_delete_removes_from_get_and_query() {
    let (_dir, registry) = open_registry();
    let c = registry.create("del", 2, DistanceMetric::Euclidean).expect("failed");
    c.add(&["a", "b", "c"], &[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]], &["", "", ""]).expect("failed");

    assert_eq!(c.delete(&["a"]).expect("failed"), 1);
    assert_eq!(c.delete(&["a"]).expect("failed"), 0);
    assert!(matches!(c.get("a"), Err(Error::NotFound(_))));

    let results = c.query(&[0.0, 0.0], 3).expect("failed");
    assert_eq!(results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);

    c.delete(&["b", "c"]).expect("failed");
    assert!(matches!(c.query(&[0.0, 0.0], 1), Err(Error::EmptyIndex)));
}

#[test]
fn test_invalid_batches_write_nothing() {
    let (_dir, registry) = open_registry();
    let c = registry.create("invalid", 2, DistanceMetric::Euclidean).expect("failed");

    assert!(matches!(c.add(&["a", "b"], &[[0.0, 0.0]], &["", ""]), Err(Error::InvalidArgument(_))));
    assert!(matches!(c.add(&["a"], &[[0.0, 0.0]], &["", ""]), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        c.add(&["a", "b"], &[vec![0.0f32, 0.0], vec![0.0, 0.0, 0.0]], &["", ""]),
        Err(Error::DimensionMismatch { expected: 2, actual: 3 })
    ));
    assert!(matches!(
        c.upsert(&["a", "b"], &[[0.0, 0.0], [f32::INFINITY, 0.0]], &["", ""]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(c.delete(&[""]), Err(Error::InvalidArgument(_))));
    assert_eq!(c.count(), 0);
}

#[test]
fn test_oversized_id_late_in_batch_writes_nothing() {
    let (_dir, registry) = open_registry();
    let c = registry.create("long_ids", 2, DistanceMetric::Euclidean).expect("failed");
    let long_id = "x".repeat(70_000);

    let result = c.add(&["a", long_id.as_str()], &[[0.0, 0.0], [1.0, 1.0]], &["", ""]);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    let result = c.upsert(&["a", long_id.as_str()], &[[0.0, 0.0], [1.0, 1.0]], &["", ""]);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(c.count(), 0);
    assert!(!c.contains("a"));

    c.add(&["a"], &[[0.0, 0.0]], &[""]).expect("failed");
    assert!(matches!(c.delete(&["a", long_id.as_str()]), Err(Error::InvalidArgument(_))));
    assert!(c.contains("a"));
}

// ============================================================================
// Maintenance
// ============================================================================

#[test]
fn test_compact_keeps_live_records() {
    let (_dir, registry) = open_registry();
    let c = registry.create("compact", 2, DistanceMetric::Euclidean).expect("failed");
    let ids: Vec<String> = (0..50).map(|i| format!("r{i}")).collect();
    let vectors: Vec<[f32; 2]> = (0..50).map(|i| [i as f32, 0.0]).collect();
    c.add(&ids, &vectors, &vec!["payload"; 50]).expect("failed");
    c.delete(&ids[25..]).expect("failed");
    assert!(c.needs_compaction(0.3, 1));

    let report = c.compact().expect("failed");
    assert_eq!(report.store.records_kept, 25);
    assert_eq!(report.nodes_purged, 25);
    assert!(report.store.bytes_after < report.store.bytes_before);
    assert!(!c.needs_compaction(0.3, 1));

    assert_eq!(c.count(), 25);
    let results = c.query(&[30.0, 0.0], 1).expect("failed");
    assert_eq!(results[0].id, "r24");
    assert_eq!(c.get("r0").expect("failed").payload, b"payload");
}
