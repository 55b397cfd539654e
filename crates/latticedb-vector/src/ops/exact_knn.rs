//! Exact k-nearest-neighbor search.
//!
//! Computes the distance to every vector. Exact but linear in the number of
//! vectors; used as the ground truth when measuring HNSW recall and for
//! small collections where a graph is not worth building.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::distance::DistanceMetric;
use crate::error::{VectorError, VectorResult};
use crate::index::{SearchResult, VectorIndex};

/// Rank `(id, vector)` pairs by distance to `query` and keep the closest `k`.
///
/// Equal distances are ordered by id. Vectors of the wrong dimension are skipped.
pub fn exact_knn<'a, I>(
    vectors: I,
    query: &[f32],
    metric: DistanceMetric,
    k: usize,
) -> Vec<SearchResult>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut candidates: Vec<(&str, f32)> = vectors
        .into_iter()
        .filter(|(_, v)| v.len() == query.len())
        .map(|(id, v)| (id, metric.calculate(query, v)))
        .collect();

    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    candidates.truncate(k);
    candidates.into_iter().map(|(id, distance)| SearchResult::new(id, distance)).collect()
}

/// A [`VectorIndex`] that answers every query by exhaustive scan.
#[derive(Debug)]
pub struct ExactKnn {
    dimension: usize,
    metric: DistanceMetric,
    entries: RwLock<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    positions: HashMap<String, usize>,
    vectors: Vec<(String, Vec<f32>)>,
}

impl ExactKnn {
    /// Create an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error if `dimension` is zero.
    pub fn new(dimension: usize, metric: DistanceMetric) -> VectorResult<Self> {
        if dimension == 0 {
            return Err(VectorError::InvalidDimension { expected: 1, actual: 0 });
        }
        Ok(Self { dimension, metric, entries: RwLock::new(Entries::default()) })
    }

    /// The distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn check_vector(&self, vector: &[f32]) -> VectorResult<()> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.metric.validate(vector)
    }
}

impl VectorIndex for ExactKnn {
    fn insert(&self, id: &str, vector: &[f32]) -> VectorResult<()> {
        self.check_vector(vector)?;
        let mut entries = self.entries.write();
        match entries.positions.get(id).copied() {
            Some(position) => entries.vectors[position].1 = vector.to_vec(),
            None => {
                let position = entries.vectors.len();
                entries.vectors.push((id.to_string(), vector.to_vec()));
                entries.positions.insert(id.to_string(), position);
            }
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> VectorResult<bool> {
        let mut entries = self.entries.write();
        let Some(position) = entries.positions.remove(id) else {
            return Ok(false);
        };
        entries.vectors.remove(position);
        for slot in entries.positions.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(true)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _ef_search: Option<usize>,
    ) -> VectorResult<Vec<SearchResult>> {
        if k == 0 {
            return Err(VectorError::InvalidK);
        }
        self.check_vector(query)?;
        let entries = self.entries.read();
        if entries.vectors.is_empty() {
            return Err(VectorError::EmptyIndex);
        }
        let vectors = entries.vectors.iter().map(|(id, v)| (id.as_str(), v.as_slice()));
        Ok(exact_knn(vectors, query, self.metric, k))
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.read().positions.contains_key(id)
    }

    fn len(&self) -> usize {
        self.entries.read().vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
