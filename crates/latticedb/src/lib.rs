//! `LatticeDB` - An Embedded Vector Database
//!
//! LatticeDB stores vectors with opaque payloads in named collections and
//! answers approximate nearest neighbor queries over them with an HNSW graph.
//!
//! # Features
//!
//! - **Durable collections**: every write lands in a checksummed append-only
//!   log before it is acknowledged; torn tails are truncated on recovery
//! - **HNSW search**: sub-linear approximate k-NN with cosine, Euclidean or
//!   dot-product distance
//! - **Concurrent access**: readers and writers share a collection; lock
//!   timeouts surface as retryable [`Error::Busy`]
//! - **Compaction**: dead records are reclaimed on demand or by a background
//!   thread
//!
//! # Quick Start
//!
//! ```no_run
//! use latticedb::{CollectionRegistry, Config, DistanceMetric};
//!
//! # fn main() -> latticedb::Result<()> {
//! let registry = CollectionRegistry::open(Config::new("/tmp/latticedb"))?;
//! let things = registry.get_or_create("things", 2, DistanceMetric::Euclidean)?;
//!
//! things.add(
//!     &["dog", "cat", "car"],
//!     &[[0.12, 0.45], [0.15, 0.50], [0.85, 0.20]],
//!     &["Dog", "Cat", "Car"],
//! )?;
//!
//! for hit in things.query(&[0.14, 0.48], 2)? {
//!     println!("{} at {:.3}", hit.id, hit.distance);
//! }
//!
//! registry.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crates
//!
//! - [`latticedb_storage`]: the segment log behind each collection
//! - [`latticedb_vector`]: distance metrics and the HNSW index
//!
//! Embeddings are computed elsewhere; LatticeDB only stores and searches
//! the vectors it is given.

pub mod collection;
pub mod config;
pub mod error;
pub mod registry;

mod compaction;

pub use collection::{
    Collection, CollectionConfig, CollectionName, CollectionNameError, CollectionStats,
    CompactionReport, ScoredRecord,
};
pub use config::{CompactionConfig, Config};
pub use error::{Error, Result};
pub use registry::CollectionRegistry;

pub use latticedb_storage::{Record, StoreConfig, SyncMode};
pub use latticedb_vector::{DistanceMetric, HnswConfig};
