//! Segment reader.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{StorageError, StorageResult};

use super::entry::LogEntry;
use super::{
    checksum, segment_path, RecordLocation, SegmentId, FRAME_OVERHEAD, HEADER_SIZE, MAX_ENTRY_SIZE,
    SEGMENT_MAGIC, SEGMENT_VERSION,
};

/// Sequential reader over the entries of one segment.
///
/// Iteration stops after the first error; [`position`](Self::position) then
/// points at the start of the bad frame, which is where recovery truncates.
pub(crate) struct SegmentReader {
    id: SegmentId,
    reader: BufReader<File>,
    position: u64,
    end: u64,
    failed: bool,
}

impl SegmentReader {
    /// Open a segment and validate its header. Reads run to the end of file.
    pub(crate) fn open(dir: &Path, id: SegmentId) -> StorageResult<Self> {
        let file = File::open(segment_path(dir, id))?;
        let end = file.metadata()?.len();
        Self::from_file(file, id, end)
    }

    /// Open a segment, reading no further than `end`.
    pub(crate) fn open_bounded(dir: &Path, id: SegmentId, end: u64) -> StorageResult<Self> {
        let file = File::open(segment_path(dir, id))?;
        let len = file.metadata()?.len();
        Self::from_file(file, id, end.min(len))
    }

    fn from_file(file: File, id: SegmentId, end: u64) -> StorageResult<Self> {
        let mut reader = BufReader::new(file);
        validate_header(&mut reader, id)?;
        Ok(Self { id, reader, position: HEADER_SIZE, end, failed: false })
    }

    /// Offset of the next frame to read.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Start reading at `offset` instead of right after the header.
    pub(crate) fn seek_to(&mut self, offset: u64) -> StorageResult<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Read the next entry, or `None` at the end of the segment.
    pub(crate) fn next_entry(&mut self) -> StorageResult<Option<(RecordLocation, LogEntry)>> {
        if self.position >= self.end {
            return Ok(None);
        }

        let offset = self.position;
        let remaining = self.end - offset;
        if remaining < FRAME_OVERHEAD {
            return Err(StorageError::Truncated { segment: self.id, offset });
        }

        let mut len_bytes = [0u8; 4];
        self.read_exact(&mut len_bytes, offset)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 || len > MAX_ENTRY_SIZE {
            return Err(StorageError::InvalidFormat(format!(
                "invalid entry length {len} in segment {} at offset {offset}",
                self.id
            )));
        }
        if remaining < len as u64 + FRAME_OVERHEAD {
            return Err(StorageError::Truncated { segment: self.id, offset });
        }

        let mut body = vec![0u8; len];
        self.read_exact(&mut body, offset)?;
        let mut crc_bytes = [0u8; 4];
        self.read_exact(&mut crc_bytes, offset)?;

        let stored = u32::from_le_bytes(crc_bytes);
        let computed = checksum(&body);
        if stored != computed {
            return Err(StorageError::ChecksumMismatch {
                segment: self.id,
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let entry = LogEntry::decode_body(&body).map_err(|e| {
            StorageError::InvalidFormat(format!("segment {} offset {offset}: {e}", self.id))
        })?;

        let frame_len = len as u64 + FRAME_OVERHEAD;
        self.position += frame_len;
        Ok(Some((RecordLocation { segment: self.id, offset, len: frame_len }, entry)))
    }

    fn read_exact(&mut self, buf: &mut [u8], frame_offset: u64) -> StorageResult<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(StorageError::Truncated { segment: self.id, offset: frame_offset })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for SegmentReader {
    type Item = StorageResult<(RecordLocation, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read the single entry stored at `location`.
pub(crate) fn read_at(dir: &Path, location: RecordLocation) -> StorageResult<LogEntry> {
    let end = location.offset + location.len;
    let mut reader = SegmentReader::open_bounded(dir, location.segment, end)?;
    reader.seek_to(location.offset)?;
    match reader.next_entry()? {
        Some((_, entry)) => Ok(entry),
        None => Err(StorageError::Truncated { segment: location.segment, offset: location.offset }),
    }
}

fn validate_header(reader: &mut BufReader<File>, id: SegmentId) -> StorageResult<()> {
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_SIZE as usize];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(StorageError::Truncated { segment: id, offset: 0 });
        }
        Err(e) => return Err(e.into()),
    }

    if header[0..8] != SEGMENT_MAGIC {
        return Err(StorageError::InvalidFormat(format!("segment {id}: invalid magic number")));
    }

    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if version != SEGMENT_VERSION {
        return Err(StorageError::InvalidFormat(format!(
            "segment {id}: unsupported version {version}, expected {SEGMENT_VERSION}"
        )));
    }

    let stored_id = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
    if stored_id != id {
        return Err(StorageError::InvalidFormat(format!(
            "segment file {id} carries id {stored_id} in its header"
        )));
    }

    Ok(())
}
