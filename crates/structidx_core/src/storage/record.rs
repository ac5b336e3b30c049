//! Record log entries.
//!
//! ```text
//! | record_len u32 | kind u8 | key_len u32 | key | payload | crc32 |
//! ```
//!
//! `record_len` covers the whole record including itself and the checksum.
//! A `Remove` record carries an empty payload.

use crate::checksum::compute_crc32;
use crate::error::{CoreError, CoreResult};

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Latest value for a key.
    Put = 1,
    /// The key was removed.
    Remove = 2,
}

impl RecordKind {
    fn from_byte(byte: u8) -> CoreResult<Self> {
        match byte {
            1 => Ok(Self::Put),
            2 => Ok(Self::Remove),
            other => Err(CoreError::storage_corruption(format!(
                "unknown record kind {other}"
            ))),
        }
    }
}

/// One entry of a key type's record log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record kind.
    pub kind: RecordKind,
    /// Serialized key.
    pub key: Vec<u8>,
    /// Encoded file map, empty for removals.
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// record_len (4) + kind (1) + key_len (4)
    pub const HEADER_SIZE: usize = 9;
    /// Trailing checksum.
    pub const CRC_SIZE: usize = 4;
    /// Smallest possible record.
    pub const MIN_SIZE: usize = Self::HEADER_SIZE + Self::CRC_SIZE;

    /// Creates a put record.
    #[must_use]
    pub fn put(key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            kind: RecordKind::Put,
            key,
            payload,
        }
    }

    /// Creates a remove record.
    #[must_use]
    pub fn remove(key: Vec<u8>) -> Self {
        Self {
            kind: RecordKind::Remove,
            key,
            payload: Vec::new(),
        }
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::MIN_SIZE + self.key.len() + self.payload.len()
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not fit a `u32` length.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let record_len = u32::try_from(self.encoded_size())
            .map_err(|_| CoreError::storage_corruption("record too large"))?;
        let key_len = u32::try_from(self.key.len())
            .map_err(|_| CoreError::storage_corruption("key too large"))?;

        let mut buf = Vec::with_capacity(record_len as usize);
        buf.extend_from_slice(&record_len.to_le_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.payload);

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Reads the `record_len` prefix.
    #[must_use]
    pub fn peek_len(prefix: &[u8]) -> Option<usize> {
        let bytes: [u8; 4] = prefix.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes) as usize)
    }

    /// Decodes one complete record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] if the checksum fails, or a
    /// corruption error for inconsistent lengths.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(CoreError::storage_corruption("record too short"));
        }
        let record_len = Self::peek_len(data).unwrap_or(0);
        if record_len < Self::MIN_SIZE || data.len() < record_len {
            return Err(CoreError::storage_corruption("incomplete record"));
        }

        let crc_at = record_len - Self::CRC_SIZE;
        let stored = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let computed = compute_crc32(&data[..crc_at]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let kind = RecordKind::from_byte(data[4])?;
        let key_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        let key_end = Self::HEADER_SIZE + key_len;
        if key_end > crc_at {
            return Err(CoreError::storage_corruption("key length exceeds record"));
        }

        Ok(Self {
            kind,
            key: data[Self::HEADER_SIZE..key_end].to_vec(),
            payload: data[key_end..crc_at].to_vec(),
        })
    }
}
