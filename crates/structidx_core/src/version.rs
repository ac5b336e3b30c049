//! Per key type version markers.
//!
//! ## Format
//!
//! ```text
//! | magic "SIVM" (4) | version i32 (4) | created_at_millis i64 (8) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The checksum covers everything before it.
//! A marker that fails to decode is treated the same as a missing marker:
//! the key type's data is discarded and rebuilt.

use crate::checksum::compute_crc32;
use crate::error::{CoreError, CoreResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes for version marker files.
pub const MARKER_MAGIC: [u8; 4] = *b"SIVM";

const MARKER_SIZE: usize = 20;

/// Persisted schema version of one key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMarker {
    /// Schema version the on-disk data was written with.
    pub version: i32,
    /// When the data for this version was created (Unix millis).
    pub created_at_millis: i64,
}

impl VersionMarker {
    /// Creates a marker for `version` stamped with the current time.
    #[must_use]
    pub fn now(version: i32) -> Self {
        let created_at_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            version,
            created_at_millis,
        }
    }

    /// Returns true if this marker matches the declared version.
    #[must_use]
    pub fn matches(&self, declared: i32) -> bool {
        self.version == declared
    }

    /// Encodes the marker to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MARKER_SIZE);
        buf.extend_from_slice(&MARKER_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.created_at_millis.to_le_bytes());
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a marker from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size, magic, or checksum is wrong.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() != MARKER_SIZE {
            return Err(CoreError::invalid_format(format!(
                "version marker has {} bytes, expected {MARKER_SIZE}",
                data.len()
            )));
        }
        if data[0..4] != MARKER_MAGIC {
            return Err(CoreError::invalid_format("invalid version marker magic"));
        }

        let stored = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let computed = compute_crc32(&data[..16]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let version = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let mut millis = [0u8; 8];
        millis.copy_from_slice(&data[8..16]);

        Ok(Self {
            version,
            created_at_millis: i64::from_le_bytes(millis),
        })
    }
}
