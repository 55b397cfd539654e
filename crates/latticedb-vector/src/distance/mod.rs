//! Metrics and the kernels behind them.
//!
//! All metrics follow one ranking contract: a lower score means more similar.
//! Dot product is therefore negated.
//!
//! # Features
//!
//! - `simd` (default): kernels built on `wide::f32x8`, 8 lanes per iteration
//! - `scalar`: force the plain iterator kernels (useful for debugging)

#[cfg(all(feature = "simd", not(feature = "scalar")))]
mod simd;

#[cfg(any(feature = "scalar", not(feature = "simd")))]
mod scalar;

#[cfg(all(feature = "simd", not(feature = "scalar")))]
pub use simd::{
    cosine_distance, cosine_similarity, dot_product, euclidean_distance,
    euclidean_distance_squared, l2_norm, sum_of_squares,
};

#[cfg(any(feature = "scalar", not(feature = "simd")))]
pub use scalar::{
    cosine_distance, cosine_similarity, dot_product, euclidean_distance,
    euclidean_distance_squared, l2_norm, sum_of_squares,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{VectorError, VectorResult};

/// How a collection scores the gap between two vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance: `1 - dot(a, b) / (|a| |b|)`.
    Cosine,
    /// Straight-line distance, `|a - b|`.
    Euclidean,
    /// Negated dot product.
    DotProduct,
}

impl DistanceMetric {
    /// Distance between two vectors, without validation.
    ///
    /// Callers guarantee equal lengths. For cosine, a zero vector scores 1.0
    /// (orthogonal to everything).
    #[inline]
    #[must_use]
    pub fn calculate(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Euclidean => euclidean_distance(a, b),
            Self::Cosine => cosine_distance(a, b),
            Self::DotProduct => -dot_product(a, b),
        }
    }

    /// Distance between two vectors, checking dimensions and (for cosine)
    /// non-zero norms.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> VectorResult<f32> {
        if a.len() != b.len() {
            return Err(VectorError::DimensionMismatch { expected: a.len(), actual: b.len() });
        }
        if *self == Self::Cosine && (sum_of_squares(a) == 0.0 || sum_of_squares(b) == 0.0) {
            return Err(VectorError::DegenerateVector);
        }
        Ok(self.calculate(a, b))
    }

    /// Check that `v` can be scored under this metric: every component finite,
    /// and non-zero magnitude for cosine.
    pub fn validate(&self, v: &[f32]) -> VectorResult<()> {
        if let Some((index, &value)) = v.iter().enumerate().find(|(_, x)| !x.is_finite()) {
            let reason = if value.is_nan() {
                "NaN is not allowed"
            } else {
                "infinity is not allowed"
            };
            return Err(VectorError::InvalidValue { index, value, reason });
        }
        if *self == Self::Cosine && sum_of_squares(v) == 0.0 {
            return Err(VectorError::DegenerateVector);
        }
        Ok(())
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::DotProduct => "dot_product",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "dot" | "dot_product" | "ip" | "inner_product" => Ok(Self::DotProduct),
            _ => Err(VectorError::UnknownMetric(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn assert_near(a: f32, b: f32, epsilon: f32) {
        assert!((a - b).abs() < epsilon, "assertion failed: {a} !~ {b} (diff: {})", (a - b).abs());
    }

    #[test]
    fn test_euclidean_three_four_five() {
        assert_near(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0, EPSILON);
        assert_near(euclidean_distance_squared(&[0.0, 0.0], &[3.0, 4.0]), 25.0, EPSILON);
    }

    #[test]
    fn test_euclidean_over_embedding_width() {
        let a: Vec<f32> = (0..1536).map(|i| i as f32 * 0.001).collect();
        let b: Vec<f32> = (0..1536).map(|i| (i + 1) as f32 * 0.001).collect();

        let dist = euclidean_distance(&a, &b);
        assert!(dist > 0.039 && dist < 0.040, "Expected ~0.0392, got {dist}");
    }

    #[test]
    fn test_cosine_range() {
        assert_near(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]), 0.0, EPSILON);
        assert_near(cosine_distance(&[1.0, 0.0], &[0.0, 1.0]), 1.0, EPSILON);
        assert_near(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]), 2.0, EPSILON);
    }

    #[test]
    fn test_metric_calculate() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert_near(DistanceMetric::DotProduct.calculate(&a, &b), -32.0, EPSILON);
        assert_near(DistanceMetric::Euclidean.calculate(&a, &b), 27.0_f32.sqrt(), EPSILON);
    }

    #[test]
    fn test_checked_distance() {
        assert!(matches!(
            DistanceMetric::Euclidean.distance(&[1.0, 2.0], &[1.0]),
            Err(VectorError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            DistanceMetric::Cosine.distance(&[0.0, 0.0], &[1.0, 0.0]),
            Err(VectorError::DegenerateVector)
        ));
        // Zero vectors are fine for the other metrics.
        let d = DistanceMetric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert_near(d, 5.0, EPSILON);
    }

    #[test]
    fn test_validate() {
        assert!(DistanceMetric::Euclidean.validate(&[1.0, 2.0]).is_ok());
        assert!(matches!(
            DistanceMetric::Euclidean.validate(&[1.0, f32::NAN]),
            Err(VectorError::InvalidValue { index: 1, .. })
        ));
        assert!(matches!(
            DistanceMetric::DotProduct.validate(&[f32::INFINITY]),
            Err(VectorError::InvalidValue { index: 0, .. })
        ));
        assert!(matches!(
            DistanceMetric::Cosine.validate(&[0.0, 0.0]),
            Err(VectorError::DegenerateVector)
        ));
    }

    #[test]
    fn test_lower_is_more_similar() {
        let q = [0.14, 0.48];
        let dog = [0.12, 0.45];
        let car = [0.85, 0.20];
        for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean] {
            assert!(metric.calculate(&q, &dog) < metric.calculate(&q, &car), "{metric}");
        }
        // Larger dot product ranks first.
        let larger = DistanceMetric::DotProduct.calculate(&[1.0], &[2.0]);
        let smaller = DistanceMetric::DotProduct.calculate(&[1.0], &[1.0]);
        assert!(larger < smaller);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!("ip".parse::<DistanceMetric>().unwrap(), DistanceMetric::DotProduct);
        assert!(matches!("hamming".parse::<DistanceMetric>(), Err(VectorError::UnknownMetric(_))));

        let metrics =
            [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::DotProduct];
        for metric in metrics {
            assert_eq!(metric.to_string().parse::<DistanceMetric>().unwrap(), metric);
        }
    }
}
