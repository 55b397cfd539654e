//! Property-based tests for collection invariants.

use std::collections::{HashMap, HashSet};

use latticedb::{DistanceMetric, Error};
use proptest::prelude::*;

use crate::open_registry;

fn vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, dim)
}

fn records_strategy() -> impl Strategy<Value = Vec<(String, Vec<f32>, Vec<u8>)>> {
    prop::collection::vec(
        ("[a-z0-9]{1,12}", vector_strategy(3), prop::collection::vec(any::<u8>(), 0..64)),
        1..40,
    )
    .prop_map(|records| {
        // Keep the first occurrence of each id.
        let mut seen = HashSet::new();
        records.into_iter().filter(|(id, _, _)| seen.insert(id.clone())).collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every added record reads back exactly as written.
    #[test]
    fn prop_add_then_get_round_trips(records in records_strategy()) {
        let (_dir, registry) = open_registry();
        let c = registry.create("c", 3, DistanceMetric::Euclidean).expect("failed");

        let ids: Vec<&str> = records.iter().map(|(id, _, _)| id.as_str()).collect();
        let vectors: Vec<&[f32]> = records.iter().map(|(_, v, _)| v.as_slice()).collect();
        let payloads: Vec<&[u8]> = records.iter().map(|(_, _, p)| p.as_slice()).collect();
        c.add(&ids, &vectors, &payloads).expect("failed");

        prop_assert_eq!(c.count(), records.len());
        for (id, vector, payload) in &records {
            let record = c.get(id).expect("failed");
            prop_assert_eq!(&record.vector, vector);
            prop_assert_eq!(&record.payload, payload);
        }
    }

    /// Query results are bounded by k, sorted, distinct, and carry true distances.
    #[test]
    fn prop_query_sorted_and_bounded(
        records in records_strategy(),
        query in vector_strategy(3),
        k in 1usize..20,
    ) {
        let (_dir, registry) = open_registry();
        let c = registry.create("c", 3, DistanceMetric::Euclidean).expect("failed");

        let ids: Vec<&str> = records.iter().map(|(id, _, _)| id.as_str()).collect();
        let vectors: Vec<&[f32]> = records.iter().map(|(_, v, _)| v.as_slice()).collect();
        let payloads = vec![b"".as_slice(); records.len()];
        c.add(&ids, &vectors, &payloads).expect("failed");

        let by_id: HashMap<&str, &[f32]> =
            ids.iter().copied().zip(vectors.iter().copied()).collect();
        let results = c.query(&query, k).expect("failed");

        prop_assert!(!results.is_empty());
        prop_assert!(results.len() <= k.min(records.len()));
        prop_assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        let distinct: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
        prop_assert_eq!(distinct.len(), results.len());
        for r in &results {
            let expected = DistanceMetric::Euclidean.calculate(&query, by_id[r.id.as_str()]);
            prop_assert!((r.distance - expected).abs() <= 1e-3 * expected.max(1.0));
        }
    }

    /// Deleted ids disappear from `get` and from query results.
    #[test]
    fn prop_deleted_ids_are_gone(records in records_strategy(), query in vector_strategy(3)) {
        let (_dir, registry) = open_registry();
        let c = registry.create("c", 3, DistanceMetric::Euclidean).expect("failed");

        let ids: Vec<&str> = records.iter().map(|(id, _, _)| id.as_str()).collect();
        let vectors: Vec<&[f32]> = records.iter().map(|(_, v, _)| v.as_slice()).collect();
        c.add(&ids, &vectors, &vec![""; ids.len()]).expect("failed");

        let deleted: Vec<&str> = ids.iter().copied().step_by(2).collect();
        prop_assert_eq!(c.delete(&deleted).expect("failed"), deleted.len());

        for id in &deleted {
            prop_assert!(matches!(c.get(id), Err(Error::NotFound(_))));
        }
        match c.query(&query, ids.len()) {
            Ok(results) => {
                prop_assert!(results.iter().all(|r| !deleted.contains(&r.id.as_str())));
            }
            Err(Error::EmptyIndex) => prop_assert_eq!(deleted.len(), ids.len()),
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }
}
