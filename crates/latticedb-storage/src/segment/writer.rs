//! Segment writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::{StoreConfig, SyncMode};
use crate::error::StorageResult;

use super::entry::LogEntry;
use super::{
    segment_path, sync_dir, RecordLocation, SegmentId, HEADER_SIZE, SEGMENT_MAGIC, SEGMENT_VERSION,
};

/// Appends framed entries to a single segment file.
///
/// Entries are buffered until [`commit`](Self::commit); only committed
/// entries may be published to readers.
pub(crate) struct SegmentWriter {
    id: SegmentId,
    writer: BufWriter<File>,
    position: u64,
    sync_mode: SyncMode,
}

impl SegmentWriter {
    /// Create a new, empty segment.
    pub(crate) fn create(dir: &Path, id: SegmentId, config: &StoreConfig) -> StorageResult<Self> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::with_capacity(config.buffer_size, file);

        writer.write_all(&SEGMENT_MAGIC)?;
        writer.write_all(&SEGMENT_VERSION.to_le_bytes())?;
        writer.write_all(&id.to_le_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        sync_dir(dir)?;

        Ok(Self { id, writer, position: HEADER_SIZE, sync_mode: config.sync_mode })
    }

    /// Reopen an existing segment for appending at `position`.
    ///
    /// Anything past `position` (a torn tail) is cut off.
    pub(crate) fn reopen(
        dir: &Path,
        id: SegmentId,
        position: u64,
        config: &StoreConfig,
    ) -> StorageResult<Self> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if file.metadata()?.len() != position {
            file.set_len(position)?;
            file.sync_all()?;
        }
        let mut writer = BufWriter::with_capacity(config.buffer_size, file);
        writer.seek(SeekFrom::Start(position))?;
        Ok(Self { id, writer, position, sync_mode: config.sync_mode })
    }

    /// Buffer an entry and return where it will live once committed.
    pub(crate) fn append(&mut self, entry: &LogEntry) -> StorageResult<RecordLocation> {
        let frame = entry.encode_frame()?;
        self.writer.write_all(&frame)?;

        let location = RecordLocation {
            segment: self.id,
            offset: self.position,
            len: frame.len() as u64,
        };
        self.position += frame.len() as u64;
        Ok(location)
    }

    /// Flush buffered entries and fsync according to the sync mode.
    pub(crate) fn commit(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        if self.sync_mode == SyncMode::Immediate {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flush and fsync regardless of the sync mode.
    pub(crate) fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub(crate) fn id(&self) -> SegmentId {
        self.id
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }
}
