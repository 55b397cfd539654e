//! Tuning knobs for [`HnswIndex`](super::HnswIndex).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VectorError, VectorResult};

/// Default seed for layer assignment.
pub const DEFAULT_SEED: u64 = 0x5EED_1A77_1CE0_0001;

/// Highest layer a node can be assigned to.
pub const MAX_LEVEL: usize = 16;

/// Graph shape and beam widths for one index.
///
/// Persisted alongside each collection in the manifest, so changing the
/// defaults does not alter collections that already exist. A fixed `seed`
/// with a fixed insertion order reproduces the same graph.
///
/// A query for `k` results searches with `max(ef_search, k)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Neighbor cap on layers above 0 (`M`).
    pub m: usize,
    /// Neighbor cap on layer 0.
    pub m_max0: usize,
    /// Candidate list size while linking a new node.
    pub ef_construction: usize,
    /// Candidate list size for queries that don't set their own.
    pub ef_search: usize,
    /// Scale of the exponential layer draw; `1 / ln(m)` by default.
    pub ml: f64,
    /// Seed for layer assignment.
    pub seed: u64,
    /// How long inserts wait for a neighbor list or maintenance lock.
    #[serde(skip, default = "default_lock_timeout")]
    pub lock_timeout: Duration,
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}

impl HnswConfig {
    /// Defaults derived from `m` (clamped to 2): layer 0 shares the same cap,
    /// construction beam 200, search beam 50.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(m: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: m,
            ef_construction: 200,
            ef_search: 50,
            ml: 1.0 / (m as f64).ln(),
            seed: DEFAULT_SEED,
            lock_timeout: default_lock_timeout(),
        }
    }

    /// Override the construction beam.
    #[must_use]
    pub const fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    /// Override the default query beam.
    #[must_use]
    pub const fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    /// Override the layer 0 neighbor cap.
    #[must_use]
    pub const fn with_m_max0(mut self, m_max0: usize) -> Self {
        self.m_max0 = m_max0;
        self
    }

    /// Override the layer multiplier.
    #[must_use]
    pub const fn with_ml(mut self, ml: f64) -> Self {
        self.ml = ml;
        self
    }

    /// Override the layer seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Override the lock wait.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Maximum degree of a node at `layer`.
    #[inline]
    #[must_use]
    pub const fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Reject parameter combinations the index cannot work with.
    pub fn validate(&self) -> VectorResult<()> {
        if self.m < 2 {
            return Err(VectorError::InvalidConfig(format!("m must be at least 2, got {}", self.m)));
        }
        if self.m_max0 < 1 {
            return Err(VectorError::InvalidConfig("m_max0 must be at least 1".into()));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(VectorError::InvalidConfig("ef values must be at least 1".into()));
        }
        if !(self.ml.is_finite() && self.ml > 0.0) {
            return Err(VectorError::InvalidConfig(format!("ml must be positive, got {}", self.ml)));
        }
        Ok(())
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::new(16)
    }
}
