//! Approximate nearest neighbor search over a layered proximity graph.
//!
//! Every node lives on layer 0 and on layers `1..=level`, with `level` drawn
//! from an exponential distribution so upper layers stay sparse. A query
//! walks greedily down from the entry point and finishes with a beam search
//! on layer 0. Graph shape is controlled by [`HnswConfig`]: `m` caps the
//! neighbor lists, `ef_construction` sizes the beam used while linking, and
//! `ef_search` is the default query beam.
//!
//! # Example
//!
//! ```
//! use latticedb_vector::distance::DistanceMetric;
//! use latticedb_vector::index::{HnswConfig, HnswIndex, VectorIndex};
//!
//! let index = HnswIndex::new(2, DistanceMetric::Euclidean, HnswConfig::default()).unwrap();
//! index.insert("a", &[0.0, 0.0]).unwrap();
//! index.insert("b", &[1.0, 1.0]).unwrap();
//!
//! let results = index.search(&[0.9, 0.9], 1, None).unwrap();
//! assert_eq!(results[0].id, "b");
//! ```

mod config;
mod graph;
mod hnsw;
mod persistence;
mod traits;

pub use config::{HnswConfig, DEFAULT_SEED, MAX_LEVEL};
pub use hnsw::{HnswIndex, IndexStats};
pub use traits::{SearchResult, VectorIndex};
