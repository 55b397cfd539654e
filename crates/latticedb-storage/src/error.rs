//! Error types for the storage crate.

use std::io;

use crate::segment::SegmentId;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the record log.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// A vector does not match the store's dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The store's configured dimension.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// The record is absent or has been deleted.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The record id cannot be stored (empty or longer than 65535 bytes).
    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    /// An encoded entry exceeds the maximum frame size.
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),

    /// Checksum mismatch - data corruption detected.
    #[error(
        "checksum mismatch in segment {segment} at {offset}: expected {expected:#x} got {actual:#x}"
    )]
    ChecksumMismatch {
        /// The segment holding the corrupt entry.
        segment: SegmentId,
        /// Byte offset of the entry frame.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// The segment ends in the middle of an entry.
    #[error("segment {segment} truncated at offset {offset}")]
    Truncated {
        /// The truncated segment.
        segment: SegmentId,
        /// Byte offset where the partial entry starts.
        offset: u64,
    },

    /// Invalid segment header or entry framing.
    #[error("invalid segment format: {0}")]
    InvalidFormat(String),

    /// The checkpoint file could not be decoded or failed validation.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// Serialization of a checkpoint failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The store was opened with unusable parameters.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    /// A lock could not be acquired before the configured timeout.
    #[error("store busy: {0}")]
    Busy(&'static str),
}

impl StorageError {
    /// Returns true if this error indicates on-disk corruption.
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::Truncated { .. }
                | Self::InvalidFormat(_)
                | Self::CorruptCheckpoint(_)
        )
    }

    /// Returns true if the caller may retry the operation.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
