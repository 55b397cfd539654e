//! The vector store: a durable, append-only record log with an in-memory
//! location map.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::checkpoint::{write_checkpoint, Checkpoint};
use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::recovery::{recover, RecoveryReport};
use crate::segment::entry::{put_body_len, LogEntry};
use crate::segment::reader::{read_at, SegmentReader};
use crate::segment::writer::SegmentWriter;
use crate::segment::{
    segment_path, sync_dir, Lsn, RecordLocation, SegmentId, HEADER_SIZE, MAX_ENTRY_SIZE,
};
use crate::state::{LiveEntry, StoreState};

/// Counters describing the store's on-disk footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Records visible to `get` and `scan`.
    pub live_records: usize,
    /// Ids whose latest entry is a delete.
    pub tombstones: usize,
    /// Number of segment files.
    pub segments: usize,
    /// The segment receiving new writes.
    pub active_segment: SegmentId,
    /// Committed bytes across all segments.
    pub total_bytes: u64,
    /// Bytes held by superseded versions and delete markers.
    pub dead_bytes: u64,
}

impl StoreStats {
    /// Fraction of committed bytes that compaction would reclaim.
    pub fn dead_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.dead_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Outcome of a [`VectorStore::compact`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionStats {
    /// Live records copied into the new segment.
    pub records_kept: usize,
    /// Old segment files deleted.
    pub segments_removed: usize,
    /// Committed bytes before compaction.
    pub bytes_before: u64,
    /// Committed bytes after compaction.
    pub bytes_after: u64,
}

struct WriterState {
    segment: SegmentWriter,
    next_lsn: Lsn,
}

/// Durable storage for the records of one collection.
///
/// Writes are serialized behind a single writer lock and become visible only
/// after they are committed to disk. Reads never touch the writer lock; they
/// see the location map as of the last completed write.
///
/// # Example
///
/// ```ignore
/// use latticedb_storage::{StoreConfig, VectorStore};
///
/// let store = VectorStore::open("/tmp/store", 3, StoreConfig::default())?;
/// store.put("a", &[1.0, 0.0, 0.0], b"doc")?;
/// assert_eq!(store.get("a")?.payload, b"doc");
/// ```
pub struct VectorStore {
    dir: PathBuf,
    dimension: usize,
    config: StoreConfig,
    writer: Mutex<WriterState>,
    state: RwLock<StoreState>,
    // Held shared by every live `Scan`, exclusively by `compact`.
    scans: RwLock<()>,
    recovery: RecoveryReport,
}

impl VectorStore {
    /// Open the store in `dir`, creating it if necessary, and replay the log.
    ///
    /// Torn or corrupt entries are truncated during replay; see
    /// [`recovery_report`](Self::recovery_report) for what was discarded.
    pub fn open(
        dir: impl AsRef<Path>,
        dimension: usize,
        config: StoreConfig,
    ) -> StorageResult<Self> {
        if dimension == 0 {
            return Err(StorageError::InvalidConfig("dimension must be at least 1".into()));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let recovered = recover(&dir, dimension, &config)?;
        let mut state = recovered.state;

        let segment = match state.segments.iter().next_back() {
            Some((&id, &len)) => SegmentWriter::reopen(&dir, id, len, &config)?,
            None => {
                let writer = SegmentWriter::create(&dir, 1, &config)?;
                state.extend_segment(1, HEADER_SIZE);
                writer
            }
        };

        debug!(dir = %dir.display(), dimension, active = segment.id(), "opened vector store");

        Ok(Self {
            dir,
            dimension,
            config,
            writer: Mutex::new(WriterState { segment, next_lsn: recovered.next_lsn }),
            state: RwLock::new(state),
            scans: RwLock::new(()),
            recovery: recovered.report,
        })
    }

    /// Insert or overwrite a record. Returns the LSN assigned to the write.
    ///
    /// The write is committed (and fsynced under [`SyncMode::Immediate`])
    /// before it becomes visible or this call returns.
    ///
    /// [`SyncMode::Immediate`]: crate::SyncMode::Immediate
    pub fn put(&self, id: &str, vector: &[f32], payload: &[u8]) -> StorageResult<Lsn> {
        self.check_put(id, vector, payload)?;

        let mut writer = self.lock_writer("put")?;
        let lsn = writer.next_lsn;
        let entry = LogEntry::Put(Record::new(id, vector.to_vec(), payload.to_vec()).with_lsn(lsn));
        self.append_and_publish(&mut writer, &entry)?;
        Ok(lsn)
    }

    /// Check that `put(id, vector, payload)` would be accepted, without
    /// writing anything. Lets callers validate a whole batch up front.
    pub fn check_put(&self, id: &str, vector: &[f32], payload: &[u8]) -> StorageResult<()> {
        Self::check_id(id)?;
        if vector.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let body_len = put_body_len(id.len(), vector.len(), payload.len());
        if body_len > MAX_ENTRY_SIZE {
            return Err(StorageError::RecordTooLarge(body_len));
        }
        Ok(())
    }

    /// Check that `id` is a storable record id: non-empty and at most
    /// `u16::MAX` bytes.
    pub fn check_id(id: &str) -> StorageResult<()> {
        if id.is_empty() || id.len() > usize::from(u16::MAX) {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(())
    }

    /// Tombstone a record. Returns false if the id was not live.
    pub fn delete(&self, id: &str) -> StorageResult<bool> {
        Self::check_id(id)?;
        let mut writer = self.lock_writer("delete")?;
        if !self.state.read().live.contains_key(id) {
            return Ok(false);
        }

        let entry = LogEntry::Delete { lsn: writer.next_lsn, id: id.to_string() };
        self.append_and_publish(&mut writer, &entry)?;
        Ok(true)
    }

    /// Fetch the live version of a record.
    pub fn get(&self, id: &str) -> StorageResult<Record> {
        // Holding the read lock keeps compaction from deleting the segment.
        let state = self.state.read();
        let live = state.live.get(id).ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        match read_at(&self.dir, live.location)? {
            LogEntry::Put(record) => Ok(record),
            LogEntry::Delete { .. } => Err(StorageError::InvalidFormat(format!(
                "location of {id:?} points at a delete marker"
            ))),
        }
    }

    /// LSN of the live version of `id`, if any.
    pub fn lsn_of(&self, id: &str) -> Option<Lsn> {
        self.state.read().live.get(id).map(|e| e.lsn)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().live.contains_key(id)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.read().live.len()
    }

    /// True if no records are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of every stored vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Directory holding the segment files.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// What recovery found when this store was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Iterate live records in storage order.
    ///
    /// The scan covers what was committed when it started; each call starts
    /// a fresh pass over the current on-disk state. Writes proceed while a
    /// scan is alive, but [`compact`](Self::compact) waits for it to be
    /// dropped and reports `Busy` if that takes longer than the lock timeout.
    pub fn scan(&self) -> Scan<'_> {
        let pin = self.scans.read_recursive();
        let segments = self.state.read().segments.iter().map(|(&id, &len)| (id, len)).collect();
        Scan { store: self, _pin: pin, segments, reader: None, done: false }
    }

    /// Persist the location map so the next open only replays newer entries.
    pub fn checkpoint(&self) -> StorageResult<()> {
        let mut writer = self.lock_writer("checkpoint")?;
        writer.segment.sync()?;
        let checkpoint = Checkpoint::capture(&self.state.read(), self.dimension, writer.next_lsn);
        write_checkpoint(&self.dir, &checkpoint)?;
        debug!(dir = %self.dir.display(), live = checkpoint.live.len(), "store checkpoint written");
        Ok(())
    }

    /// Rewrite live records into a fresh segment and delete the old ones.
    ///
    /// Records keep their LSNs. Writes wait (up to the lock timeout) while
    /// compaction runs, and compaction waits for open scans to finish.
    pub fn compact(&self) -> StorageResult<CompactionStats> {
        let _no_scans = self
            .scans
            .try_write_for(self.config.lock_timeout)
            .ok_or(StorageError::Busy("scan"))?;
        let mut writer = self.lock_writer("compact")?;
        writer.segment.sync()?;

        let (mut live, old_segments, bytes_before) = {
            let state = self.state.read();
            let live: Vec<(String, LiveEntry)> =
                state.live.iter().map(|(id, e)| (id.clone(), *e)).collect();
            let old: Vec<SegmentId> = state.segments.keys().copied().collect();
            (live, old, state.total_bytes())
        };
        live.sort_by_key(|(_, e)| (e.location.segment, e.location.offset));

        let new_id = writer.segment.id() + 1;
        let mut target = SegmentWriter::create(&self.dir, new_id, &self.config)?;
        let mut compacted = StoreState::default();
        for (id, entry) in &live {
            let record = match read_at(&self.dir, entry.location)? {
                LogEntry::Put(record) => record,
                LogEntry::Delete { .. } => {
                    return Err(StorageError::InvalidFormat(format!(
                        "location of {id:?} points at a delete marker"
                    )))
                }
            };
            let lsn = record.lsn;
            let location = target.append(&LogEntry::Put(record))?;
            compacted.live.insert(id.clone(), LiveEntry { location, lsn });
        }
        target.sync()?;
        compacted.extend_segment(new_id, target.position());

        // Once this checkpoint is durable, recovery discards the old segments.
        let checkpoint = Checkpoint::capture(&compacted, self.dimension, writer.next_lsn);
        write_checkpoint(&self.dir, &checkpoint)?;

        let bytes_after = compacted.total_bytes();
        *self.state.write() = compacted;
        writer.segment = target;

        for &id in &old_segments {
            fs::remove_file(segment_path(&self.dir, id))?;
        }
        sync_dir(&self.dir)?;

        let stats = CompactionStats {
            records_kept: live.len(),
            segments_removed: old_segments.len(),
            bytes_before,
            bytes_after,
        };
        info!(
            dir = %self.dir.display(),
            kept = stats.records_kept,
            removed = stats.segments_removed,
            bytes_before,
            bytes_after,
            "store compacted"
        );
        Ok(stats)
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            live_records: state.live.len(),
            tombstones: state.tombstones.len(),
            segments: state.segments.len(),
            active_segment: state.segments.keys().next_back().copied().unwrap_or(0),
            total_bytes: state.total_bytes(),
            dead_bytes: state.dead_bytes,
        }
    }

    /// True if at least `min_dead_bytes` and more than `ratio` of the
    /// committed bytes are dead.
    pub fn needs_compaction(&self, ratio: f64, min_dead_bytes: u64) -> bool {
        let stats = self.stats();
        stats.dead_bytes >= min_dead_bytes && stats.dead_ratio() > ratio
    }

    /// Flush and fsync the active segment.
    pub fn sync(&self) -> StorageResult<()> {
        self.lock_writer("sync")?.segment.sync()
    }

    fn lock_writer(&self, op: &'static str) -> StorageResult<MutexGuard<'_, WriterState>> {
        self.writer.try_lock_for(self.config.lock_timeout).ok_or(StorageError::Busy(op))
    }

    fn append_and_publish(&self, writer: &mut WriterState, entry: &LogEntry) -> StorageResult<()> {
        if writer.segment.position() >= self.config.max_segment_size {
            self.rotate(writer)?;
        }

        let location = writer.segment.append(entry)?;
        writer.segment.commit()?;
        writer.next_lsn += 1;

        let mut state = self.state.write();
        state.apply(location, entry);
        state.extend_segment(location.segment, location.offset + location.len);
        Ok(())
    }

    fn rotate(&self, writer: &mut WriterState) -> StorageResult<()> {
        writer.segment.sync()?;
        let next = writer.segment.id() + 1;
        let segment = SegmentWriter::create(&self.dir, next, &self.config)?;
        self.state.write().extend_segment(next, HEADER_SIZE);
        debug!(
            dir = %self.dir.display(),
            sealed = writer.segment.id(),
            active = next,
            "rotated segment"
        );
        writer.segment = segment;
        Ok(())
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dir", &self.dir)
            .field("dimension", &self.dimension)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Lazy iterator over live records, returned by [`VectorStore::scan`].
pub struct Scan<'a> {
    store: &'a VectorStore,
    _pin: RwLockReadGuard<'a, ()>,
    segments: std::collections::VecDeque<(SegmentId, u64)>,
    reader: Option<SegmentReader>,
    done: bool,
}

impl Scan<'_> {
    fn is_live(&self, location: RecordLocation, id: &str) -> bool {
        self.store.state.read().live.get(id).is_some_and(|e| e.location == location)
    }
}

impl Iterator for Scan<'_> {
    type Item = StorageResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.reader.is_none() {
                let Some((id, len)) = self.segments.pop_front() else {
                    self.done = true;
                    break;
                };
                match SegmentReader::open_bounded(&self.store.dir, id, len) {
                    Ok(reader) => self.reader = Some(reader),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
            let Some(reader) = self.reader.as_mut() else { continue };

            match reader.next_entry() {
                Ok(Some((location, LogEntry::Put(record)))) => {
                    if self.is_live(location, &record.id) {
                        return Some(Ok(record));
                    }
                }
                Ok(Some((_, LogEntry::Delete { .. }))) => {}
                Ok(None) => self.reader = None,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
