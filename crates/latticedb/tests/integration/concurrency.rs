//! Concurrent readers and writers on shared collections.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use latticedb::{CollectionRegistry, DistanceMetric};

use crate::{open_registry, test_config};

fn vector(t: usize, i: usize) -> [f32; 4] {
    [t as f32, i as f32, (t * i) as f32 * 0.01, 1.0]
}

#[test]
fn test_concurrent_disjoint_inserts_lose_nothing() {
    let (_dir, registry) = open_registry();
    let c = registry.create("c", 4, DistanceMetric::Euclidean).expect("failed");
    let threads = 8;
    let per_thread = 100;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let c = Arc::clone(&c);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    c.add(&[format!("t{t}-{i}")], &[vector(t, i)], &[format!("payload {t} {i}")])
                        .expect("insert failed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked");
    }

    let scanned: Vec<_> = c.peek(usize::MAX).expect("failed");
    assert_eq!(scanned.len(), threads * per_thread);
    let ids: HashSet<String> = scanned.into_iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), threads * per_thread);
    assert_eq!(c.count(), threads * per_thread);
    assert_eq!(c.stats().index.live, threads * per_thread);

    let hit = c.query(&vector(3, 42), 1).expect("failed");
    assert_eq!(hit[0].id, "t3-42");
    assert_eq!(hit[0].payload, b"payload 3 42");
}

#[test]
fn test_queries_during_writes() {
    let (_dir, registry) = open_registry();
    let c = registry.create("c", 4, DistanceMetric::Euclidean).expect("failed");
    c.add(&["seed"], &[[0.0, 0.0, 0.0, 1.0]], &[""]).expect("failed");

    let writer = {
        let c = Arc::clone(&c);
        thread::spawn(move || {
            for i in 0..300 {
                c.upsert(&[format!("w{i}")], &[vector(1, i)], &[""]).expect("upsert failed");
                if i % 3 == 0 {
                    c.delete(&[format!("w{}", i / 2)]).expect("delete failed");
                }
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|r| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                for i in 0..200 {
                    let results = c.query(&vector(r, i), 5).expect("query failed");
                    assert!(results.len() <= 5);
                    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
                    let unique: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
                    assert_eq!(unique.len(), results.len());
                }
            })
        })
        .collect();

    writer.join().expect("writer panicked");
    for reader in readers {
        reader.join().expect("reader panicked");
    }
    assert_eq!(c.count(), c.stats().index.live);
}

#[test]
fn test_same_id_writers_keep_store_and_index_in_step() {
    let (_dir, registry) = open_registry();
    let c = registry.create("c", 4, DistanceMetric::Euclidean).expect("failed");

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                for i in 0..50 {
                    c.upsert(&["shared"], &[vector(t, i)], &[format!("{t}-{i}")])
                        .expect("upsert failed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked");
    }

    // Whatever write won, the index points at the same vector as the store.
    let stored = c.get("shared").expect("failed");
    let hit = c.query(&stored.vector, 1).expect("failed");
    assert_eq!(hit[0].id, "shared");
    assert!(hit[0].distance.abs() < 1e-6);
    assert_eq!(c.stats().index.live, 1);
}

#[test]
fn test_get_or_create_race_yields_one_collection() {
    let dir = tempfile::tempdir().expect("failed");
    let registry = Arc::new(CollectionRegistry::open(test_config(&dir)).expect("failed"));
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.get_or_create("shared", 2, DistanceMetric::Cosine).expect("failed")
            })
        })
        .collect();
    let collections: Vec<_> = handles.into_iter().map(|h| h.join().expect("panicked")).collect();

    assert!(collections.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.list(), vec!["shared"]);
}

fn retry<T>(mut op: impl FnMut() -> latticedb::Result<T>) -> T {
    loop {
        match op() {
            Ok(value) => return value,
            Err(e) if e.is_retryable() => thread::yield_now(),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[test]
fn test_writes_during_compaction_succeed_or_report_busy() {
    let dir = tempfile::tempdir().expect("failed");
    let config = test_config(&dir).with_lock_timeout(Duration::from_millis(1));
    let registry = CollectionRegistry::open(config).expect("failed");
    let c = registry.create("c", 4, DistanceMetric::Euclidean).expect("failed");

    let compactor = {
        let c = Arc::clone(&c);
        thread::spawn(move || {
            for _ in 0..5 {
                retry(|| c.compact());
            }
        })
    };
    let writer = {
        let c = Arc::clone(&c);
        thread::spawn(move || {
            for i in 0..200 {
                let id = format!("r{i}");
                // A Busy write has no effect, so retrying it is safe.
                retry(|| c.upsert(&[id.as_str()], &[vector(0, i)], &[""]));
                if i % 2 == 0 {
                    retry(|| c.delete(&[id.as_str()]));
                }
            }
        })
    };

    compactor.join().expect("compactor panicked");
    writer.join().expect("writer panicked");

    assert_eq!(c.count(), 100);
    assert_eq!(c.stats().index.live, 100);
    assert_eq!(c.query(&vector(0, 199), 1).expect("failed")[0].id, "r199");
}
