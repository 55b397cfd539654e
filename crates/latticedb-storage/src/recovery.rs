//! Crash recovery: rebuild the location map from the checkpoint and segments.
//!
//! Recovery never fails on a torn or corrupt entry. The segment is truncated
//! at the first bad frame, the discarded range is logged, and replay moves on.

use std::fs::{self, OpenOptions};
use std::path::Path;

use tracing::{error, info, warn};

use crate::checkpoint::{covers_disk, read_checkpoint, remove_checkpoint, Checkpoint};
use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::segment::entry::LogEntry;
use crate::segment::reader::SegmentReader;
use crate::segment::writer::SegmentWriter;
use crate::segment::{list_segments, segment_path, Lsn, SegmentId, HEADER_SIZE};
use crate::state::StoreState;

/// A range of bytes cut off a segment during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    /// The segment that was truncated.
    pub segment: SegmentId,
    /// New length of the segment; everything from here on was discarded.
    pub offset: u64,
    /// Number of bytes discarded.
    pub bytes_discarded: u64,
}

/// What opening a store found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether a valid checkpoint let replay skip already-applied entries.
    pub used_checkpoint: bool,
    /// Segments read during replay.
    pub segments_replayed: usize,
    /// Entries decoded during replay.
    pub entries_replayed: usize,
    /// Entries that changed the location map (the rest were superseded).
    pub entries_applied: usize,
    /// Leftover segments from an interrupted compaction that were removed.
    pub stale_segments_removed: usize,
    /// Truncations performed to drop torn or corrupt data.
    pub truncations: Vec<Truncation>,
}

impl RecoveryReport {
    /// True if any bytes were discarded.
    pub fn has_data_loss(&self) -> bool {
        !self.truncations.is_empty()
    }

    /// Total bytes discarded across all truncations.
    pub fn bytes_discarded(&self) -> u64 {
        self.truncations.iter().map(|t| t.bytes_discarded).sum()
    }
}

pub(crate) struct Recovered {
    pub state: StoreState,
    pub next_lsn: Lsn,
    pub report: RecoveryReport,
}

/// Rebuild the store state for the segments in `dir`.
pub(crate) fn recover(
    dir: &Path,
    dimension: usize,
    config: &StoreConfig,
) -> StorageResult<Recovered> {
    let on_disk = list_segments(dir)?;
    let mut report = RecoveryReport::default();

    let checkpoint = load_checkpoint(dir, dimension)?;
    let (mut state, mut next_lsn, replay_plan) = match checkpoint {
        Some(checkpoint) => {
            report.used_checkpoint = true;
            let covered_max = checkpoint.segments.iter().map(|&(id, _)| id).max().unwrap_or(0);
            let next_lsn = checkpoint.next_lsn;
            let state = checkpoint.into_state();

            let mut plan = Vec::new();
            for &id in &on_disk {
                match state.segments.get(&id) {
                    Some(&committed) => {
                        if fs::metadata(segment_path(dir, id))?.len() > committed {
                            plan.push((id, committed));
                        }
                    }
                    None if id < covered_max => {
                        fs::remove_file(segment_path(dir, id))?;
                        report.stale_segments_removed += 1;
                        info!(segment = id, "removed segment superseded by compaction");
                    }
                    None => plan.push((id, HEADER_SIZE)),
                }
            }
            (state, next_lsn, plan)
        }
        None => {
            let plan = on_disk.iter().map(|&id| (id, HEADER_SIZE)).collect();
            (StoreState::default(), 1, plan)
        }
    };

    let last_segment = on_disk.last().copied();
    for (id, start) in replay_plan {
        let is_last = Some(id) == last_segment;
        let max_lsn =
            replay_segment(dir, id, start, is_last, dimension, config, &mut state, &mut report)?;
        next_lsn = next_lsn.max(max_lsn + 1);
        report.segments_replayed += 1;
    }
    next_lsn = next_lsn.max(state.max_lsn() + 1);

    info!(
        live = state.live.len(),
        segments = state.segments.len(),
        replayed = report.entries_replayed,
        applied = report.entries_applied,
        used_checkpoint = report.used_checkpoint,
        "store recovery complete"
    );

    Ok(Recovered { state, next_lsn, report })
}

/// Returns a checkpoint only if it matches what is on disk.
fn load_checkpoint(dir: &Path, dimension: usize) -> StorageResult<Option<Checkpoint>> {
    match read_checkpoint(dir) {
        Ok(Some(checkpoint)) => {
            if checkpoint.dimension != dimension {
                return Err(StorageError::DimensionMismatch {
                    expected: dimension,
                    actual: checkpoint.dimension,
                });
            }
            if covers_disk(dir, &checkpoint) {
                Ok(Some(checkpoint))
            } else {
                // Writes after this open would regrow the segments past the
                // recorded lengths and make the stale checkpoint look valid.
                warn!("checkpoint refers to missing data, falling back to full replay");
                remove_checkpoint(dir)?;
                Ok(None)
            }
        }
        Ok(None) => Ok(None),
        Err(e) if e.is_corruption() => {
            warn!(error = %e, "ignoring unreadable checkpoint, falling back to full replay");
            remove_checkpoint(dir)?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Apply the entries of one segment from `start`, truncating at the first bad
/// frame. Returns the highest LSN seen.
#[allow(clippy::too_many_arguments)]
fn replay_segment(
    dir: &Path,
    id: SegmentId,
    start: u64,
    is_last: bool,
    dimension: usize,
    config: &StoreConfig,
    state: &mut StoreState,
    report: &mut RecoveryReport,
) -> StorageResult<Lsn> {
    let mut reader = match SegmentReader::open(dir, id) {
        Ok(reader) => reader,
        Err(e) if e.is_corruption() => {
            // Unusable header: nothing in the file can be trusted.
            let discarded = fs::metadata(segment_path(dir, id))?.len();
            log_data_loss(id, 0, discarded, is_last, &e);
            SegmentWriter::create(dir, id, config)?;
            report.truncations.push(Truncation {
                segment: id,
                offset: 0,
                bytes_discarded: discarded,
            });
            state.extend_segment(id, HEADER_SIZE);
            return Ok(0);
        }
        Err(e) => return Err(e),
    };
    reader.seek_to(start)?;

    let mut max_lsn = 0;
    loop {
        match reader.next_entry() {
            Ok(Some((location, entry))) => {
                if let LogEntry::Put(record) = &entry {
                    if record.dimension() != dimension {
                        return Err(StorageError::DimensionMismatch {
                            expected: dimension,
                            actual: record.dimension(),
                        });
                    }
                }
                max_lsn = max_lsn.max(entry.lsn());
                report.entries_replayed += 1;
                if state.apply(location, &entry) {
                    report.entries_applied += 1;
                }
            }
            Ok(None) => break,
            Err(e) if e.is_corruption() => {
                let offset = reader.position();
                let file = OpenOptions::new().write(true).open(segment_path(dir, id))?;
                let discarded = file.metadata()?.len().saturating_sub(offset);
                file.set_len(offset)?;
                file.sync_all()?;
                log_data_loss(id, offset, discarded, is_last, &e);
                report.truncations.push(Truncation {
                    segment: id,
                    offset,
                    bytes_discarded: discarded,
                });
                break;
            }
            Err(e) => return Err(e),
        }
    }

    state.extend_segment(id, reader.position());
    Ok(max_lsn)
}

fn log_data_loss(
    segment: SegmentId,
    offset: u64,
    discarded: u64,
    is_last: bool,
    cause: &StorageError,
) {
    if is_last {
        warn!(segment, offset, discarded, error = %cause, "truncated torn tail of segment");
    } else {
        error!(
            segment,
            offset,
            discarded,
            error = %cause,
            "corruption inside a sealed segment; entries after the offset were discarded"
        );
    }
}
