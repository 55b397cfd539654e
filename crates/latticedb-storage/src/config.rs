//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum segment size before rotation (64 MiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Default write buffer size (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default time to wait for a lock before reporting `Busy`.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`VectorStore`](crate::VectorStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum segment file size before a new segment is started.
    pub max_segment_size: u64,

    /// Buffer size for segment writes.
    pub buffer_size: usize,

    /// Sync mode for durability.
    pub sync_mode: SyncMode,

    /// How long writers and compaction wait for locks.
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            sync_mode: SyncMode::Immediate,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Set the segment rotation threshold.
    #[must_use]
    pub const fn with_max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Set the sync mode.
    #[must_use]
    pub const fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Set the lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Sync mode determines when appended entries are fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync before every acknowledgement (safest)
    #[default]
    Immediate,
    /// Hand writes to the OS without fsync. Acknowledged writes can be lost on
    /// power failure; intended for bulk loads and tests.
    None,
}

/// Serde helper storing a [`Duration`] as integer milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize a duration from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
