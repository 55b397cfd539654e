//! Collections: a named record store bound to an HNSW index.
//!
//! A [`Collection`] owns one [`VectorStore`] (the source of truth) and one
//! [`HnswIndex`] built over it. Writes go to the store first and then to the
//! index, tagged with the store's LSN so a stale index update can never
//! overwrite a newer one. Queries search the index and fetch payloads from
//! the store.
//!
//! # On-disk layout
//!
//! ```text
//! <collection dir>/
//!     store/          segment files and store checkpoint
//!     graph.snap      HNSW snapshot, written at each checkpoint
//! ```
//!
//! On open the snapshot is loaded and reconciled against a scan of the
//! store. A missing or unreadable snapshot is rebuilt from the scan.

mod config;
mod name;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use latticedb_storage::{CompactionStats, Record, StorageError, StoreStats, VectorStore};
use latticedb_vector::{HnswIndex, IndexStats, VectorError, VectorIndex};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use config::CollectionConfig;
pub use name::{CollectionName, CollectionNameError, MAX_NAME_LEN};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::manifest::ManifestFile;

/// Subdirectory holding the record store.
const STORE_DIR: &str = "store";

/// File name of the graph snapshot.
const SNAPSHOT_FILE: &str = "graph.snap";

/// Number of per-id write locks.
const LOCK_STRIPES: usize = 64;

/// A query hit with its payload attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// Record id.
    pub id: String,
    /// Distance to the query; lower is more similar.
    pub distance: f32,
    /// The record's payload.
    pub payload: Vec<u8>,
}

/// Counters for one collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectionStats {
    /// Live records.
    pub records: usize,
    /// Record store counters.
    pub store: StoreStats,
    /// Index counters.
    pub index: IndexStats,
}

/// Outcome of [`Collection::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionReport {
    /// Store compaction counters.
    pub store: CompactionStats,
    /// Tombstoned graph nodes removed.
    pub nodes_purged: usize,
}

/// What reconciling the index against the store changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Reconciled {
    inserted: usize,
    removed: usize,
    skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Add,
    Upsert,
}

/// A named collection of vectors with payloads.
///
/// Collections are shared as `Arc<Collection>` and every method takes
/// `&self`. Writes to disjoint ids run concurrently; writes to the same id
/// are serialized. [`compact`](Self::compact) locks the whole collection,
/// and other operations report [`Error::Busy`] if they cannot get in within
/// the configured lock timeout.
pub struct Collection {
    name: CollectionName,
    dir: PathBuf,
    config: CollectionConfig,
    store: VectorStore,
    index: HnswIndex,
    /// Shared by foreground operations, exclusive for compaction and drop.
    gate: RwLock<()>,
    stripes: Box<[Mutex<()>]>,
    lock_timeout: Duration,
    checkpoint_every: u64,
    mutations: AtomicU64,
    dropped: AtomicBool,
    manifest: Arc<ManifestFile>,
}

impl Collection {
    /// Open (or create) the collection stored in `dir`.
    pub(crate) fn open(
        name: CollectionName,
        dir: PathBuf,
        config: CollectionConfig,
        options: &Config,
        manifest: Arc<ManifestFile>,
    ) -> Result<Self> {
        config.validate()?;
        let hnsw = config.hnsw.clone().with_lock_timeout(options.lock_timeout);

        let store =
            VectorStore::open(dir.join(STORE_DIR), config.dimension, options.store.clone())?;
        let report = store.recovery_report();
        if report.has_data_loss() {
            warn!(
                collection = %name,
                bytes_discarded = report.bytes_discarded(),
                "collection store recovered with data loss"
            );
        }

        let snapshot = dir.join(SNAPSHOT_FILE);
        let index = if snapshot.exists() {
            match HnswIndex::load(&snapshot, config.dimension, config.metric, hnsw.clone(), |id| {
                store.get(id).ok().map(|record| record.vector)
            }) {
                Ok(index) => index,
                Err(e) => {
                    warn!(
                        collection = %name,
                        error = %e,
                        "graph snapshot unusable, rebuilding from store"
                    );
                    HnswIndex::new(config.dimension, config.metric, hnsw)?
                }
            }
        } else {
            debug!(collection = %name, "no graph snapshot, building from store");
            HnswIndex::new(config.dimension, config.metric, hnsw)?
        };

        let reconciled = reconcile(&name, &store, &index)?;
        info!(
            collection = %name,
            records = store.len(),
            inserted = reconciled.inserted,
            removed = reconciled.removed,
            skipped = reconciled.skipped,
            "collection opened"
        );

        Ok(Self {
            name,
            dir,
            config,
            store,
            index,
            gate: RwLock::new(()),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            lock_timeout: options.lock_timeout,
            checkpoint_every: options.checkpoint_every,
            mutations: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
            manifest,
        })
    }

    /// The collection name.
    #[inline]
    pub fn name(&self) -> &CollectionName {
        &self.name
    }

    /// The collection configuration.
    #[inline]
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Directory holding this collection's files.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Insert new records.
    ///
    /// The three slices are parallel: `ids[i]` gets `vectors[i]` and
    /// `payloads[i]`. The whole batch is validated before anything is
    /// written. Once writing starts, a failure on one item leaves the
    /// earlier items in place.
    ///
    /// Re-adding an id with exactly the same vector and payload is a no-op.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for unequal lengths, empty ids or NaN components
    /// - `DuplicateId` if an id repeats within the batch or already exists
    ///   with different content
    /// - `DimensionMismatch` or `DegenerateVector` for a bad vector
    /// - `Busy` if the collection is being compacted
    pub fn add<S, V, P>(&self, ids: &[S], vectors: &[V], payloads: &[P]) -> Result<()>
    where
        S: AsRef<str>,
        V: AsRef<[f32]>,
        P: AsRef<[u8]>,
    {
        self.write_batch(ids, vectors, payloads, WriteMode::Add)
    }

    /// Insert records, overwriting any that exist.
    ///
    /// Validation and partial-failure behaviour match [`add`](Self::add),
    /// except that existing ids are replaced instead of rejected.
    pub fn upsert<S, V, P>(&self, ids: &[S], vectors: &[V], payloads: &[P]) -> Result<()>
    where
        S: AsRef<str>,
        V: AsRef<[f32]>,
        P: AsRef<[u8]>,
    {
        self.write_batch(ids, vectors, payloads, WriteMode::Upsert)
    }

    /// The `n_results` records nearest to `vector`, closest first.
    ///
    /// Returns fewer results when the collection holds fewer records.
    ///
    /// # Errors
    ///
    /// `InvalidK` for `n_results == 0`, `EmptyIndex` for an empty
    /// collection, `DimensionMismatch`/`DegenerateVector` for a bad query.
    pub fn query(&self, vector: &[f32], n_results: usize) -> Result<Vec<ScoredRecord>> {
        self.query_with_ef(vector, n_results, None)
    }

    /// [`query`](Self::query) with an explicit search beam width.
    pub fn query_with_ef(
        &self,
        vector: &[f32],
        n_results: usize,
        ef: Option<usize>,
    ) -> Result<Vec<ScoredRecord>> {
        let _gate = self.read_gate()?;
        let hits = self.index.search_with_ef(vector, n_results, ef)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get(&hit.id) {
                Ok(record) => {
                    results.push(ScoredRecord {
                        id: hit.id,
                        distance: hit.distance,
                        payload: record.payload,
                    });
                }
                // Deleted between the search and the fetch.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(results)
    }

    /// Delete records. Returns how many of `ids` existed.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty id, `Busy` on lock timeout.
    pub fn delete<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        if let Some(position) = ids.iter().position(|id| id.as_ref().is_empty()) {
            return Err(Error::invalid_argument(format!("id at position {position} is empty")));
        }
        for id in ids {
            VectorStore::check_id(id.as_ref())?;
        }

        let _gate = self.read_gate()?;
        let mut removed = 0;
        for id in ids {
            let id = id.as_ref();
            let existed = {
                let _lock = self.lock_id(id)?;
                let existed = self.store.delete(id)?;
                self.index.delete(id)?;
                existed
            };
            if existed {
                removed += 1;
                self.note_mutation();
            }
        }
        debug!(collection = %self.name, requested = ids.len(), removed, "deleted records");
        Ok(removed)
    }

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is absent or deleted.
    pub fn get(&self, id: &str) -> Result<Record> {
        let _gate = self.read_gate()?;
        Ok(self.store.get(id)?)
    }

    /// Up to `limit` records in storage order.
    pub fn peek(&self, limit: usize) -> Result<Vec<Record>> {
        let _gate = self.read_gate()?;
        Ok(self.store.scan().take(limit).collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Number of live records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.store.len()
    }

    /// Whether `id` is live.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            records: self.store.len(),
            store: self.store.stats(),
            index: self.index.stats(),
        }
    }

    /// True if the store's dead bytes exceed both thresholds.
    #[must_use]
    pub fn needs_compaction(&self, dead_ratio: f64, min_dead_bytes: u64) -> bool {
        self.store.needs_compaction(dead_ratio, min_dead_bytes)
    }

    /// Persist the store checkpoint and a graph snapshot, and record the
    /// entry point in the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or lock timeout.
    pub fn checkpoint(&self) -> Result<()> {
        let _gate = self.read_gate()?;
        self.write_checkpoint()
    }

    /// Reclaim space held by deleted and overwritten records.
    ///
    /// Holds the collection exclusively: concurrent operations wait up to the
    /// lock timeout and then fail with `Busy`.
    pub fn compact(&self) -> Result<CompactionReport> {
        let _gate = self.write_gate()?;
        self.ensure_open()?;

        let store = self.store.compact()?;
        let nodes_purged = self.index.purge_tombstones()?;
        self.write_checkpoint()?;

        let report = CompactionReport { store, nodes_purged };
        info!(
            collection = %self.name,
            records = report.store.records_kept,
            nodes_purged,
            bytes_before = report.store.bytes_before,
            bytes_after = report.store.bytes_after,
            "collection compacted"
        );
        Ok(report)
    }

    /// Mark the collection dropped. Waits for in-flight operations; every
    /// later call fails with `NotFound`.
    pub(crate) fn retire(&self) -> Result<()> {
        let _gate = self.write_gate()?;
        self.dropped.store(true, Ordering::Release);
        Ok(())
    }

    fn write_batch<S, V, P>(
        &self,
        ids: &[S],
        vectors: &[V],
        payloads: &[P],
        mode: WriteMode,
    ) -> Result<()>
    where
        S: AsRef<str>,
        V: AsRef<[f32]>,
        P: AsRef<[u8]>,
    {
        self.validate_batch(ids, vectors, payloads)?;
        let _gate = self.read_gate()?;

        if mode == WriteMode::Add {
            for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
                self.check_not_taken(id.as_ref(), vector.as_ref(), payload.as_ref())?;
            }
        }

        let mut written = 0;
        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            let (id, vector, payload) = (id.as_ref(), vector.as_ref(), payload.as_ref());
            let wrote = {
                let _lock = self.lock_id(id)?;
                if mode == WriteMode::Add && !self.check_not_taken(id, vector, payload)? {
                    false
                } else {
                    let lsn = self.store.put(id, vector, payload)?;
                    self.index.insert_with_lsn(id, vector, lsn)?;
                    true
                }
            };
            if wrote {
                written += 1;
                self.note_mutation();
            }
        }
        debug!(collection = %self.name, ?mode, requested = ids.len(), written, "wrote records");
        Ok(())
    }

    /// Everything that can be checked without writing, so a rejected batch
    /// leaves no partial effect.
    fn validate_batch<S, V, P>(&self, ids: &[S], vectors: &[V], payloads: &[P]) -> Result<()>
    where
        S: AsRef<str>,
        V: AsRef<[f32]>,
        P: AsRef<[u8]>,
    {
        if ids.len() != vectors.len() || ids.len() != payloads.len() {
            return Err(Error::invalid_argument(format!(
                "ids, vectors and payloads must have equal lengths (got {}, {}, {})",
                ids.len(),
                vectors.len(),
                payloads.len()
            )));
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let rows = ids.iter().zip(vectors).zip(payloads).enumerate();
        for (position, ((id, vector), payload)) in rows {
            let id = id.as_ref();
            if id.is_empty() {
                return Err(Error::invalid_argument(format!("id at position {position} is empty")));
            }
            if !seen.insert(id) {
                return Err(Error::DuplicateId(id.to_string()));
            }
            let vector = vector.as_ref();
            if vector.len() != self.config.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: vector.len(),
                });
            }
            self.config.metric.validate(vector)?;
            self.store.check_put(id, vector, payload.as_ref())?;
        }
        Ok(())
    }

    /// `Ok(true)` if `id` is free, `Ok(false)` if it already holds exactly
    /// this content, `DuplicateId` otherwise.
    fn check_not_taken(&self, id: &str, vector: &[f32], payload: &[u8]) -> Result<bool> {
        if !self.store.contains(id) {
            return Ok(true);
        }
        match self.store.get(id) {
            Ok(existing) if existing.same_content(vector, payload) => Ok(false),
            Ok(_) => Err(Error::DuplicateId(id.to_string())),
            Err(StorageError::NotFound(_)) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn write_checkpoint(&self) -> Result<()> {
        self.store.checkpoint()?;
        self.index.save(&self.dir.join(SNAPSHOT_FILE))?;

        let entry = self.index.entry_point();
        self.manifest.update(|manifest| {
            if let Some(record) = manifest.collections.get_mut(self.name.as_str()) {
                record.entry_point = entry.as_ref().map(|(id, _)| id.clone());
                record.max_layer = entry.as_ref().map(|&(_, level)| level);
            }
            Ok(())
        })?;

        self.mutations.store(0, Ordering::Release);
        debug!(
            collection = %self.name,
            records = self.store.len(),
            "collection checkpoint written"
        );
        Ok(())
    }

    /// Count a mutation and checkpoint once `checkpoint_every` have piled up.
    fn note_mutation(&self) {
        if self.checkpoint_every == 0 {
            return;
        }
        let count = self.mutations.fetch_add(1, Ordering::AcqRel) + 1;
        if count < self.checkpoint_every {
            return;
        }
        if self.mutations.compare_exchange(count, 0, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        if let Err(e) = self.write_checkpoint() {
            warn!(collection = %self.name, error = %e, "automatic checkpoint failed");
        }
    }

    fn lock_id(&self, id: &str) -> Result<MutexGuard<'_, ()>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let slot = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[slot].try_lock_for(self.lock_timeout).ok_or(Error::Busy("record lock"))
    }

    fn read_gate(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self.gate.try_read_for(self.lock_timeout).ok_or(Error::Busy("collection"))?;
        self.ensure_open()?;
        Ok(guard)
    }

    fn write_gate(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.gate.try_write_for(self.lock_timeout).ok_or(Error::Busy("collection"))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(Error::NotFound(format!("collection {:?}", self.name.as_str())));
        }
        Ok(())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("dimension", &self.config.dimension)
            .field("metric", &self.config.metric)
            .field("records", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Bring `index` in line with the store: insert records it is missing or
/// holds at a different LSN, and delete ids the store no longer has.
fn reconcile(name: &CollectionName, store: &VectorStore, index: &HnswIndex) -> Result<Reconciled> {
    let mut stats = Reconciled::default();
    let mut live = HashSet::with_capacity(store.len());

    for record in store.scan() {
        let record = record?;
        match index.lsn_of(&record.id) {
            Some(lsn) if lsn == record.lsn => {}
            indexed => {
                // An index ahead of the store means the store lost that write.
                if indexed.is_some_and(|lsn| lsn > record.lsn) {
                    index.delete(&record.id)?;
                }
                match index.insert_with_lsn(&record.id, &record.vector, record.lsn) {
                    Ok(_) => stats.inserted += 1,
                    Err(e @ (VectorError::InvalidValue { .. } | VectorError::DegenerateVector)) => {
                        warn!(
                            collection = %name,
                            id = %record.id,
                            error = %e,
                            "stored vector cannot be indexed"
                        );
                        stats.skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        live.insert(record.id);
    }

    for id in index.ids() {
        if !live.contains(&id) && index.delete(&id)? {
            stats.removed += 1;
        }
    }
    Ok(stats)
}
