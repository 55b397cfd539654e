//! # LatticeDB Storage
//!
//! Durable record storage for LatticeDB collections.
//!
//! Each collection owns one [`VectorStore`]: an append-only log of
//! `(id, vector, payload)` records split into numbered segment files, plus an
//! in-memory map from id to the location of its live version.
//!
//! ## Durability
//!
//! Every write is framed with a length prefix and a CRC32 and is committed
//! before it becomes visible. On open the store loads its checkpoint (if any)
//! and replays the segments written after it. A frame that fails its checksum
//! or ends early marks the boundary of lost data: the segment is truncated
//! there and recovery continues.
//!
//! ## Space reclamation
//!
//! Deletes append a tombstone entry; overwritten and deleted versions stay on
//! disk until [`VectorStore::compact`] copies the live records into a fresh
//! segment.

pub mod config;
pub mod error;
pub mod record;
pub mod segment;

mod checkpoint;
mod recovery;
mod state;
mod store;

pub use config::{StoreConfig, SyncMode};
pub use error::{StorageError, StorageResult};
pub use record::Record;
pub use recovery::{RecoveryReport, Truncation};
pub use segment::{Lsn, RecordLocation, SegmentId};
pub use store::{CompactionStats, Scan, StoreStats, VectorStore};
