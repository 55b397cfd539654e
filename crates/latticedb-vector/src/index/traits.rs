//! The index abstraction collections are written against.

use serde::{Deserialize, Serialize};

use crate::error::VectorResult;

/// One neighbor returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The id of the matching record.
    pub id: String,
    /// The distance to the query vector (lower is more similar).
    pub distance: f32,
}

impl SearchResult {
    /// Pair an id with its distance.
    #[must_use]
    pub fn new(id: impl Into<String>, distance: f32) -> Self {
        Self { id: id.into(), distance }
    }
}

/// Trait for vector indexes.
///
/// Implementations take `&self` for every operation and synchronize
/// internally, so one index can be shared across threads behind an `Arc`.
pub trait VectorIndex: Send + Sync {
    /// Insert a vector, replacing any earlier vector for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector has the wrong dimension or contains
    /// values the metric cannot score.
    fn insert(&self, id: &str, vector: &[f32]) -> VectorResult<()>;

    /// Remove `id` from the index.
    ///
    /// Returns `true` if the id was present.
    fn delete(&self, id: &str) -> VectorResult<bool>;

    /// Find the `k` nearest neighbors of `query`, closest first.
    ///
    /// `ef_search` overrides the index's default beam width for this query.
    ///
    /// # Errors
    ///
    /// Returns an error if `k` is zero, the query is invalid, or the index is
    /// empty.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: Option<usize>,
    ) -> VectorResult<Vec<SearchResult>>;

    /// Check if `id` is in the index.
    fn contains(&self, id: &str) -> bool;

    /// Number of live vectors in the index.
    fn len(&self) -> usize;

    /// True when no live vectors remain.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of vectors in this index.
    fn dimension(&self) -> usize;
}
