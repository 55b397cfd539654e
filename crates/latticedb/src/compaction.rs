//! Background compaction.
//!
//! The compactor is a single thread that wakes every
//! [`CompactionConfig::interval`], compacts each collection whose dead-byte
//! share crosses the configured threshold, and goes back to sleep. Stopping
//! it sends a signal on a channel, so shutdown does not wait out the
//! interval.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::config::CompactionConfig;
use crate::error::Error;

/// Collections shared between the registry and the compactor.
pub(crate) type CollectionMap = Arc<RwLock<HashMap<String, Arc<Collection>>>>;

/// Handle to the running compactor thread. Stops the thread when dropped.
pub(crate) struct Compactor {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Spawn the compactor thread.
    pub(crate) fn start(
        collections: CollectionMap,
        config: CompactionConfig,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop, signal) = bounded::<()>(1);
        let handle = thread::Builder::new().name("latticedb-compactor".into()).spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "compactor started");
            loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        compact_eligible(&collections, &config);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("compactor stopped");
        })?;
        Ok(Self { stop, handle: Some(handle) })
    }

    /// Signal the thread and wait for it to finish its current pass.
    pub(crate) fn stop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("compactor thread panicked");
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Compact every collection over the thresholds. Returns how many were
/// compacted.
pub(crate) fn compact_eligible(collections: &CollectionMap, config: &CompactionConfig) -> usize {
    // Compaction can be slow; do not hold the map lock while it runs.
    let candidates: Vec<Arc<Collection>> = collections
        .read()
        .values()
        .filter(|c| c.needs_compaction(config.dead_ratio, config.min_dead_bytes))
        .cloned()
        .collect();

    let mut compacted = 0;
    for collection in candidates {
        match collection.compact() {
            Ok(report) => {
                compacted += 1;
                info!(
                    collection = %collection.name(),
                    reclaimed = report.store.bytes_before.saturating_sub(report.store.bytes_after),
                    "background compaction finished"
                );
            }
            Err(Error::Busy(what)) => {
                debug!(
                    collection = %collection.name(),
                    what,
                    "collection busy, compaction deferred"
                );
            }
            // Dropped since the candidate list was taken.
            Err(Error::NotFound(_)) => {}
            Err(e) => {
                warn!(collection = %collection.name(), error = %e, "background compaction failed");
            }
        }
    }
    compacted
}
