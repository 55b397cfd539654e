//! Registry configuration.
//!
//! [`Config`] can be built in code or loaded from TOML:
//!
//! ```toml
//! path = "/var/lib/latticedb"
//! checkpoint_every = 1000
//!
//! [store]
//! sync_mode = "immediate"
//!
//! [hnsw]
//! m = 16
//! ef_search = 64
//!
//! [compaction]
//! interval = 60000
//! dead_ratio = 0.4
//! ```
//!
//! Durations are written as integer milliseconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use latticedb_storage::config::duration_millis;
use latticedb_storage::StoreConfig;
use latticedb_vector::HnswConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of mutations between automatic checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: u64 = 10_000;

/// Configuration for a [`CollectionRegistry`](crate::CollectionRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding the manifest and every collection.
    pub path: PathBuf,

    /// Create the root directory if it does not exist.
    pub create_if_missing: bool,

    /// Mutations between automatic checkpoints; 0 disables them.
    pub checkpoint_every: u64,

    /// How long collection and registry operations wait for locks.
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,

    /// Record store settings, shared by all collections.
    pub store: StoreConfig,

    /// HNSW parameters for collections created without their own.
    pub hnsw: HnswConfig,

    /// Background compaction.
    pub compaction: CompactionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("latticedb"),
            create_if_missing: true,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            lock_timeout: Duration::from_secs(5),
            store: StoreConfig::default(),
            hnsw: HnswConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration rooted at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the document does not parse or the
    /// resulting configuration is invalid.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::invalid_argument(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Set whether a missing root directory is created.
    #[must_use]
    pub const fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Set the record store configuration.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the default HNSW configuration.
    #[must_use]
    pub fn with_hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.hnsw = hnsw;
        self
    }

    /// Set the automatic checkpoint interval in mutations.
    #[must_use]
    pub const fn with_checkpoint_every(mut self, mutations: u64) -> Self {
        self.checkpoint_every = mutations;
        self
    }

    /// Set the background compaction configuration.
    #[must_use]
    pub const fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    /// Set the lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.hnsw.validate()?;
        self.compaction.validate()?;
        if self.store.max_segment_size == 0 {
            return Err(Error::invalid_argument("store.max_segment_size must be positive"));
        }
        Ok(())
    }
}

/// When the background compactor runs and what it considers worth compacting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Pause between compaction passes. `None` disables the background thread.
    #[serde(with = "optional_millis")]
    pub interval: Option<Duration>,

    /// Compact once more than this share of a collection's bytes is dead.
    pub dead_ratio: f64,

    /// Skip collections with fewer dead bytes than this.
    pub min_dead_bytes: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self { interval: None, dead_ratio: 0.5, min_dead_bytes: 1024 * 1024 }
    }
}

impl CompactionConfig {
    /// Run the background compactor every `interval`.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the dead-byte ratio threshold.
    #[must_use]
    pub const fn with_dead_ratio(mut self, ratio: f64) -> Self {
        self.dead_ratio = ratio;
        self
    }

    /// Set the minimum dead bytes.
    #[must_use]
    pub const fn with_min_dead_bytes(mut self, bytes: u64) -> Self {
        self.min_dead_bytes = bytes;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.dead_ratio > 0.0 && self.dead_ratio <= 1.0) {
            return Err(Error::invalid_argument(format!(
                "compaction.dead_ratio must be in (0, 1], got {}",
                self.dead_ratio
            )));
        }
        if self.interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::invalid_argument("compaction.interval must be positive"));
        }
        Ok(())
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
