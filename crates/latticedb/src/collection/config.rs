//! Per-collection configuration.

use latticedb_vector::{DistanceMetric, HnswConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed properties of a collection, chosen at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Length of every vector in the collection.
    pub dimension: usize,
    /// How vectors are compared.
    pub metric: DistanceMetric,
    /// Index parameters.
    pub hnsw: HnswConfig,
}

impl CollectionConfig {
    /// Configuration with default HNSW parameters.
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self { dimension, metric, hnsw: HnswConfig::default() }
    }

    /// Set the HNSW parameters.
    #[must_use]
    pub fn with_hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.hnsw = hnsw;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero dimension or bad HNSW parameters.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::invalid_argument("dimension must be at least 1"));
        }
        self.hnsw.validate()?;
        Ok(())
    }

    /// Fail with `ConfigMismatch` unless `other` has the same dimension and
    /// metric. HNSW parameters are not compared.
    pub(crate) fn ensure_compatible(&self, name: &str, other: &Self) -> Result<()> {
        if self.dimension != other.dimension || self.metric != other.metric {
            return Err(Error::ConfigMismatch(format!(
                "{name:?} has dimension {} and metric {}, requested dimension {} and metric {}",
                self.dimension, self.metric, other.dimension, other.metric
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(CollectionConfig::new(3, DistanceMetric::Cosine).validate().is_ok());
        assert!(matches!(
            CollectionConfig::new(0, DistanceMetric::Cosine).validate(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(CollectionConfig::new(3, DistanceMetric::Cosine)
            .with_hnsw(HnswConfig::default().with_ef_construction(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_compatibility_ignores_hnsw() {
        let a = CollectionConfig::new(2, DistanceMetric::Cosine);
        let b = CollectionConfig::new(2, DistanceMetric::Cosine).with_hnsw(HnswConfig::new(32));
        assert!(a.ensure_compatible("c", &b).is_ok());

        let c = CollectionConfig::new(3, DistanceMetric::Cosine);
        assert!(matches!(a.ensure_compatible("c", &c), Err(Error::ConfigMismatch(_))));
        let d = CollectionConfig::new(2, DistanceMetric::Euclidean);
        assert!(matches!(a.ensure_compatible("c", &d), Err(Error::ConfigMismatch(_))));
    }
}
