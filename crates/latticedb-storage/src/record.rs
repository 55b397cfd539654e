//! The stored record type.

use crate::segment::Lsn;

/// A stored vector with its id and opaque payload.
///
/// `lsn` is assigned by the store when the record is written; it orders
/// writes to the same id and is `0` for records that have not been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique id within the store.
    pub id: String,
    /// The vector, with the store's dimensionality.
    pub vector: Vec<f32>,
    /// Opaque payload (document text and metadata).
    pub payload: Vec<u8>,
    /// Sequence number of the write that produced this version.
    pub lsn: Lsn,
}

impl Record {
    /// Create an unsaved record.
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Vec<u8>) -> Self {
        Self { id: id.into(), vector, payload, lsn: 0 }
    }

    /// Set the sequence number.
    #[must_use]
    pub fn with_lsn(mut self, lsn: Lsn) -> Self {
        self.lsn = lsn;
        self
    }

    /// Dimensionality of the vector.
    #[inline]
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// True if this record carries exactly `vector` and `payload` (ignoring `lsn`).
    #[must_use]
    pub fn same_content(&self, vector: &[f32], payload: &[u8]) -> bool {
        self.vector == vector && self.payload == payload
    }
}
