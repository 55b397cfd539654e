//! Error types for LatticeDB.
//!
//! This module provides the [`enum@Error`] type returned by every collection
//! and registry operation. Errors from the storage and vector crates are
//! folded into it, so callers match a single enum.

use std::io;

use latticedb_storage::StorageError;
use latticedb_vector::VectorError;
use thiserror::Error;

/// Errors that can occur when using LatticeDB.
#[derive(Debug, Error)]
pub enum Error {
    /// A vector does not match the collection's dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The collection's dimension.
        expected: usize,
        /// The dimension supplied.
        actual: usize,
    },

    /// A record or collection does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An existing collection was requested with a different dimension or metric.
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// A zero vector was used with the cosine metric.
    #[error("degenerate vector: cosine distance is undefined for a zero vector")]
    DegenerateVector,

    /// Query against a collection with no records.
    #[error("collection is empty")]
    EmptyIndex,

    /// Query asked for zero results.
    #[error("n_results must be at least 1")]
    InvalidK,

    /// A lock could not be acquired in time. Safe to retry.
    #[error("busy: {0}")]
    Busy(&'static str),

    /// On-disk data failed validation.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// `add` was given an id that already holds different content, or the
    /// same id twice in one batch.
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// `create` was called with a name that is already taken.
    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input: empty ids, unequal batch lengths, bad names or values.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The registry manifest is unreadable. Fatal at open.
    #[error("manifest error: {0}")]
    Manifest(String),
}

impl Error {
    /// Returns `true` if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => Self::Io(e),
            StorageError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            StorageError::NotFound(id) => Self::NotFound(format!("record {id:?}")),
            StorageError::InvalidId(_)
            | StorageError::RecordTooLarge(_)
            | StorageError::InvalidConfig(_) => {
                Self::InvalidArgument(err.to_string())
            }
            StorageError::Busy(what) => Self::Busy(what),
            StorageError::ChecksumMismatch { .. }
            | StorageError::Truncated { .. }
            | StorageError::InvalidFormat(_)
            | StorageError::CorruptCheckpoint(_)
            | StorageError::Encoding(_) => Self::Corrupt(err.to_string()),
        }
    }
}

impl From<VectorError> for Error {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::DegenerateVector => Self::DegenerateVector,
            VectorError::EmptyIndex => Self::EmptyIndex,
            VectorError::InvalidK => Self::InvalidK,
            VectorError::Busy(what) => Self::Busy(what),
            VectorError::Io(e) => Self::Io(e),
            VectorError::Corrupt(_) | VectorError::Encoding(_) => Self::Corrupt(err.to_string()),
            VectorError::InvalidDimension { .. }
            | VectorError::InvalidValue { .. }
            | VectorError::InvalidConfig(_)
            | VectorError::UnknownMetric(_) => Self::InvalidArgument(err.to_string()),
        }
    }
}

/// A specialized `Result` type for LatticeDB operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(Error::Busy("collection").is_retryable());
        assert!(!Error::EmptyIndex.is_retryable());
        assert!(!Error::Manifest("bad".into()).is_retryable());
    }

    #[test]
    fn test_storage_errors_flatten() {
        let err: Error = StorageError::DimensionMismatch { expected: 3, actual: 2 }.into();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));

        let err: Error = StorageError::NotFound("x".into()).into();
        assert!(matches!(err, Error::NotFound(_)));

        let err: Error = StorageError::Truncated { segment: 1, offset: 16 }.into();
        assert!(matches!(err, Error::Corrupt(_)));

        let err: Error = StorageError::Busy("put").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_vector_errors_flatten() {
        let source = VectorError::InvalidValue {
            index: 0,
            value: f32::NAN,
            reason: "NaN is not allowed",
        };
        let err: Error = source.into();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err: Error = VectorError::InvalidK.into();
        assert!(matches!(err, Error::InvalidK));

        let err: Error = VectorError::Corrupt("bad magic".into()).into();
        assert_eq!(err.to_string(), "corrupt data: corrupt graph snapshot: bad magic");
    }
}
