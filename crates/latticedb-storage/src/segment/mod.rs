//! Append-only segment files.
//!
//! Records are appended to numbered segment files in the store directory
//! (`0000000001.seg`, ...). When the active segment exceeds the configured size
//! a new one is started; old segments are only ever removed by compaction.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Header (16 bytes)                        │
//! │ ├── magic: [u8; 8] = "LTCSEG\0\0"        │
//! │ ├── version: u32                         │
//! │ └── segment id: u32                      │
//! ├──────────────────────────────────────────┤
//! │ Entry frames, back to back               │
//! │ ├── length: u32 (body length)            │
//! │ ├── body: op, lsn, id, vector, payload   │
//! │ └── crc32: u32 (over body)               │
//! └──────────────────────────────────────────┘
//! ```
//!
//! See [`entry`] for the body layout.

pub(crate) mod entry;
pub(crate) mod reader;
pub(crate) mod writer;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Log Sequence Number - monotonically increasing identifier for entries.
pub type Lsn = u64;

/// Numeric identifier of a segment file.
pub type SegmentId = u32;

/// Magic number at the start of segment files: "LTCSEG\0\0"
pub(crate) const SEGMENT_MAGIC: [u8; 8] = *b"LTCSEG\0\0";

/// Current segment format version.
pub(crate) const SEGMENT_VERSION: u32 = 1;

/// Size of the segment file header.
pub(crate) const HEADER_SIZE: u64 = 16;

/// Frame overhead: length prefix plus trailing checksum.
pub(crate) const FRAME_OVERHEAD: u64 = 8;

/// Upper bound on a single entry body (sanity check during reads).
pub(crate) const MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

const SEGMENT_EXTENSION: &str = "seg";

/// Where an entry lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocation {
    /// Segment holding the entry.
    pub segment: SegmentId,
    /// Byte offset of the entry frame.
    pub offset: u64,
    /// Full frame length, including length prefix and checksum.
    pub len: u64,
}

/// Path of a segment file inside `dir`.
pub(crate) fn segment_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{id:010}.{SEGMENT_EXTENSION}"))
}

/// List the segment ids present in `dir`, sorted ascending.
pub(crate) fn list_segments(dir: &Path) -> io::Result<Vec<SegmentId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
            continue;
        }
        if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// fsync a directory so renames and new files inside it are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    // Directories cannot be opened for syncing on every platform.
    match File::open(dir) {
        Ok(f) => f.sync_all().or(Ok(())),
        Err(_) => Ok(()),
    }
}

/// CRC32 (IEEE) of a frame body.
#[inline]
pub(crate) fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
