//! In-memory view of the log: which entry is the live version of each id.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::segment::entry::LogEntry;
use crate::segment::{Lsn, RecordLocation, SegmentId};

/// The live version of a record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LiveEntry {
    pub location: RecordLocation,
    pub lsn: Lsn,
}

/// Location map plus tombstones, rebuilt by replay and kept current by writes.
///
/// Entries are applied by LSN rather than by position, so replaying the same
/// record twice (for example from a compacted segment and a leftover old one)
/// converges to the same state.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub live: HashMap<String, LiveEntry>,
    /// Deleted ids and the LSN of their delete.
    pub tombstones: HashMap<String, Lsn>,
    /// Committed length of every segment file.
    pub segments: BTreeMap<SegmentId, u64>,
    /// Bytes occupied by superseded versions and delete markers.
    pub dead_bytes: u64,
}

impl StoreState {
    /// Apply an entry located at `location`. Returns false if it was stale.
    pub fn apply(&mut self, location: RecordLocation, entry: &LogEntry) -> bool {
        match entry {
            LogEntry::Put(record) => {
                let id = record.id.as_str();
                let lsn = record.lsn;
                let deleted_later = self.tombstones.get(id).is_some_and(|&t| t >= lsn);
                let newer_live = self.live.get(id).is_some_and(|e| e.lsn >= lsn);
                if deleted_later || newer_live {
                    self.dead_bytes += location.len;
                    return false;
                }
                let entry = LiveEntry { location, lsn };
                if let Some(old) = self.live.insert(record.id.clone(), entry) {
                    self.dead_bytes += old.location.len;
                }
                self.tombstones.remove(id);
                true
            }
            LogEntry::Delete { lsn, id } => {
                self.dead_bytes += location.len;
                match self.live.get(id.as_str()) {
                    Some(existing) if existing.lsn >= *lsn => return false,
                    Some(existing) => {
                        self.dead_bytes += existing.location.len;
                        self.live.remove(id.as_str());
                    }
                    None => {}
                }
                let tombstone = self.tombstones.entry(id.clone()).or_insert(*lsn);
                *tombstone = (*tombstone).max(*lsn);
                true
            }
        }
    }

    /// Record that `segment` now holds committed data up to `end`.
    pub fn extend_segment(&mut self, segment: SegmentId, end: u64) {
        let len = self.segments.entry(segment).or_insert(end);
        *len = (*len).max(end);
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.values().sum()
    }

    /// Highest LSN mentioned by any live record or tombstone.
    pub fn max_lsn(&self) -> Lsn {
        let live = self.live.values().map(|e| e.lsn).max().unwrap_or(0);
        let dead = self.tombstones.values().copied().max().unwrap_or(0);
        live.max(dead)
    }
}
