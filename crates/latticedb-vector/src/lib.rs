//! # LatticeDB Vector
//!
//! Distance metrics and approximate nearest neighbor search for LatticeDB.
//!
//! ## Modules
//!
//! - [`distance`] - Distance metrics with SIMD kernels
//! - [`index`] - HNSW index, its configuration and snapshots
//! - [`ops`] - Exact (brute-force) k-nearest-neighbor search
//!
//! All distances follow one contract: lower means more similar.

pub mod distance;
pub mod error;
pub mod index;
pub mod ops;

pub use distance::DistanceMetric;
pub use error::{VectorError, VectorResult};
pub use index::{HnswConfig, HnswIndex, IndexStats, SearchResult, VectorIndex};
pub use ops::{exact_knn, ExactKnn};
