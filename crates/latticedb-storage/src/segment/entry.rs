//! Segment entry encoding.
//!
//! Body layout (little-endian):
//!
//! ```text
//! op: u8            1 = put, 2 = delete
//! lsn: u64
//! id_len: u16
//! id: [u8; id_len]  UTF-8
//! -- put only --
//! dimension: u32
//! vector: [f32; dimension]
//! payload_len: u32
//! payload: [u8; payload_len]
//! ```

use crate::error::{StorageError, StorageResult};
use crate::record::Record;

use super::{checksum, Lsn, MAX_ENTRY_SIZE};

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// A single entry in a segment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LogEntry {
    /// Insert or overwrite a record.
    Put(Record),
    /// Tombstone a record id.
    Delete {
        /// Sequence number of the delete.
        lsn: Lsn,
        /// The deleted id.
        id: String,
    },
}

/// Encoded body size of a put entry.
pub(crate) const fn put_body_len(id_len: usize, dimension: usize, payload_len: usize) -> usize {
    1 + 8 + 2 + id_len + 4 + dimension * 4 + 4 + payload_len
}

impl LogEntry {
    pub(crate) fn lsn(&self) -> Lsn {
        match self {
            Self::Put(record) => record.lsn,
            Self::Delete { lsn, .. } => *lsn,
        }
    }

    pub(crate) fn id(&self) -> &str {
        match self {
            Self::Put(record) => &record.id,
            Self::Delete { id, .. } => id,
        }
    }

    /// Encode this entry as a complete frame: `[len][body][crc]`.
    pub(crate) fn encode_frame(&self) -> StorageResult<Vec<u8>> {
        let body = self.encode_body()?;
        if body.len() > MAX_ENTRY_SIZE {
            return Err(StorageError::RecordTooLarge(body.len()));
        }
        let mut frame = Vec::with_capacity(body.len() + 8);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&checksum(&body).to_le_bytes());
        Ok(frame)
    }

    fn encode_body(&self) -> StorageResult<Vec<u8>> {
        let id = self.id();
        let id_len = u16::try_from(id.len()).map_err(|_| StorageError::InvalidId(id.to_string()))?;

        match self {
            Self::Put(record) => {
                let dim = u32::try_from(record.vector.len())
                    .map_err(|_| StorageError::RecordTooLarge(record.vector.len()))?;
                let payload_len = u32::try_from(record.payload.len())
                    .map_err(|_| StorageError::RecordTooLarge(record.payload.len()))?;

                let capacity = put_body_len(id.len(), record.vector.len(), record.payload.len());
                let mut body = Vec::with_capacity(capacity);
                body.push(OP_PUT);
                body.extend_from_slice(&record.lsn.to_le_bytes());
                body.extend_from_slice(&id_len.to_le_bytes());
                body.extend_from_slice(id.as_bytes());
                body.extend_from_slice(&dim.to_le_bytes());
                for value in &record.vector {
                    body.extend_from_slice(&value.to_le_bytes());
                }
                body.extend_from_slice(&payload_len.to_le_bytes());
                body.extend_from_slice(&record.payload);
                Ok(body)
            }
            Self::Delete { lsn, .. } => {
                let mut body = Vec::with_capacity(1 + 8 + 2 + id.len());
                body.push(OP_DELETE);
                body.extend_from_slice(&lsn.to_le_bytes());
                body.extend_from_slice(&id_len.to_le_bytes());
                body.extend_from_slice(id.as_bytes());
                Ok(body)
            }
        }
    }

    /// Decode an entry body whose checksum has already been verified.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor { bytes: body, pos: 0 };

        let op = cursor.u8()?;
        let lsn = cursor.u64()?;
        let id_len = cursor.u16()? as usize;
        let id = String::from_utf8(cursor.take(id_len)?.to_vec())
            .map_err(|e| format!("record id is not UTF-8: {e}"))?;

        let entry = match op {
            OP_PUT => {
                let dim = cursor.u32()? as usize;
                let raw = cursor.take(dim.checked_mul(4).ok_or("vector length overflow")?)?;
                let vector = raw
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let payload_len = cursor.u32()? as usize;
                let payload = cursor.take(payload_len)?.to_vec();
                Self::Put(Record { id, vector, payload, lsn })
            }
            OP_DELETE => Self::Delete { lsn, id },
            other => return Err(format!("unknown entry op {other}")),
        };

        if cursor.pos != body.len() {
            return Err(format!("{} trailing bytes after entry", body.len() - cursor.pos));
        }
        Ok(entry)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(format!("entry body ends early at byte {}", self.pos)),
        }
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}
