//! Failures raised by distance checks and the HNSW index.

use std::io;

use thiserror::Error;

/// Result type alias for vector operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// Everything the index and the metric checks can reject.
#[derive(Debug, Error)]
pub enum VectorError {
    /// A vector's length differs from the index dimension.
    #[error("vector has {actual} components, index expects {expected}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// An index was configured with dimension zero.
    #[error("dimension must be at least {expected}, got {actual}")]
    InvalidDimension {
        /// Smallest accepted dimension.
        expected: usize,
        /// Requested dimension.
        actual: usize,
    },

    /// A component is NaN or infinite.
    #[error("component {index} is {value}: {reason}")]
    InvalidValue {
        /// Position of the component.
        index: usize,
        /// The component itself.
        value: f32,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A zero-norm vector was used with the cosine metric.
    #[error("degenerate vector: cosine distance is undefined for a zero vector")]
    DegenerateVector,

    /// Search on an index with no live nodes.
    #[error("index is empty")]
    EmptyIndex,

    /// Search asked for zero results.
    #[error("k must be at least 1")]
    InvalidK,

    /// Invalid index parameters.
    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    /// Unknown distance metric name.
    #[error("unknown distance metric: {0:?}")]
    UnknownMetric(String),

    /// A lock could not be acquired before the configured timeout.
    #[error("index busy: {0}")]
    Busy(&'static str),

    /// A graph snapshot failed validation.
    #[error("corrupt graph snapshot: {0}")]
    Corrupt(String),

    /// bincode failed to encode or decode a snapshot.
    #[error("snapshot codec: {0}")]
    Encoding(String),

    /// I/O error while reading or writing a snapshot.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VectorError {
    /// Returns true if the caller may retry the operation.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
