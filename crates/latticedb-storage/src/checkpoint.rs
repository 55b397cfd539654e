//! Store checkpoints.
//!
//! A checkpoint captures the location map and the committed length of every
//! segment, so that opening a store only replays what was written after it.
//!
//! ## File Format
//!
//! ```text
//! magic: [u8; 8] = "LTCCKPT\0"
//! version: u32
//! payload_len: u64
//! crc32: u32          (over payload)
//! payload: bincode(Checkpoint)
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::segment::{checksum, sync_dir, Lsn, SegmentId};
use crate::state::{LiveEntry, StoreState};

const CHECKPOINT_MAGIC: [u8; 8] = *b"LTCCKPT\0";
const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_HEADER: usize = 24;
const CHECKPOINT_FILE: &str = "CHECKPOINT";

/// Persisted snapshot of [`StoreState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Checkpoint {
    pub dimension: usize,
    pub segments: Vec<(SegmentId, u64)>,
    pub next_lsn: Lsn,
    pub live: Vec<(String, LiveEntry)>,
    pub tombstones: Vec<(String, Lsn)>,
    pub dead_bytes: u64,
}

impl Checkpoint {
    pub fn capture(state: &StoreState, dimension: usize, next_lsn: Lsn) -> Self {
        Self {
            dimension,
            segments: state.segments.iter().map(|(&id, &len)| (id, len)).collect(),
            next_lsn,
            live: state.live.iter().map(|(id, e)| (id.clone(), *e)).collect(),
            tombstones: state.tombstones.iter().map(|(id, &lsn)| (id.clone(), lsn)).collect(),
            dead_bytes: state.dead_bytes,
        }
    }

    pub fn into_state(self) -> StoreState {
        StoreState {
            live: self.live.into_iter().collect(),
            tombstones: self.tombstones.into_iter().collect(),
            segments: self.segments.into_iter().collect(),
            dead_bytes: self.dead_bytes,
        }
    }
}

pub(crate) fn checkpoint_path(dir: &Path) -> PathBuf {
    dir.join(CHECKPOINT_FILE)
}

/// Atomically replace the checkpoint file.
pub(crate) fn write_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> StorageResult<()> {
    let payload = bincode::serde::encode_to_vec(checkpoint, bincode::config::standard())
        .map_err(|e| StorageError::Encoding(e.to_string()))?;

    let mut bytes = Vec::with_capacity(CHECKPOINT_HEADER + payload.len());
    bytes.extend_from_slice(&CHECKPOINT_MAGIC);
    bytes.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&checksum(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);

    let path = checkpoint_path(dir);
    let temp_path = path.with_extension("tmp");
    {
        let mut file =
            OpenOptions::new().write(true).create(true).truncate(true).open(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, &path)?;
    sync_dir(dir)?;
    Ok(())
}

/// Load the checkpoint, if one exists.
pub(crate) fn read_checkpoint(dir: &Path) -> StorageResult<Option<Checkpoint>> {
    let path = checkpoint_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;

    if bytes.len() < CHECKPOINT_HEADER {
        return Err(StorageError::CorruptCheckpoint("file too small for header".into()));
    }
    if bytes[0..8] != CHECKPOINT_MAGIC {
        return Err(StorageError::CorruptCheckpoint("invalid magic number".into()));
    }
    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != CHECKPOINT_VERSION {
        return Err(StorageError::CorruptCheckpoint(format!("unsupported version {version}")));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[12..20]);
    let len = u64::from_le_bytes(len_bytes) as usize;
    let stored_crc = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);

    let payload = bytes
        .get(CHECKPOINT_HEADER..CHECKPOINT_HEADER + len)
        .ok_or_else(|| StorageError::CorruptCheckpoint("payload truncated".into()))?;
    if checksum(payload) != stored_crc {
        return Err(StorageError::CorruptCheckpoint("checksum mismatch".into()));
    }

    let (checkpoint, _): (Checkpoint, _) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| StorageError::CorruptCheckpoint(e.to_string()))?;
    Ok(Some(checkpoint))
}

/// Remove the checkpoint file so the next open performs a full replay.
pub(crate) fn remove_checkpoint(dir: &Path) -> StorageResult<()> {
    match fs::remove_file(checkpoint_path(dir)) {
        Ok(()) => Ok(sync_dir(dir)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// True if every segment the checkpoint covers still holds at least the
/// committed bytes it recorded.
pub(crate) fn covers_disk(dir: &Path, checkpoint: &Checkpoint) -> bool {
    checkpoint.segments.iter().all(|&(id, len)| {
        File::open(crate::segment::segment_path(dir, id))
            .and_then(|f| f.metadata())
            .is_ok_and(|m| m.len() >= len)
    })
}
