//! Registry manifest listing the key types known at the last startup.
//!
//! Comparing this list with the key types declared by the current build
//! finds orphaned directories left behind by key types that were removed.

use crate::checksum::compute_crc32;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeSet;

/// Magic bytes for the key type manifest.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SIKT";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// Set of key type names persisted by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTypeManifest {
    /// Known key type names.
    pub names: BTreeSet<String>,
}

impl KeyTypeManifest {
    /// Creates a manifest from names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns names in this manifest that are not in `declared`.
    #[must_use]
    pub fn orphans(&self, declared: &BTreeSet<String>) -> Vec<String> {
        self.names.difference(declared).cloned().collect()
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());

        let count = u32::try_from(self.names.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for name in &self.names {
            let bytes = name.as_bytes();
            let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&bytes[..usize::from(len)]);
        }

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a manifest from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are truncated, have the wrong magic or
    /// version, or fail the checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 14 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid key type manifest"));
        }

        let body_len = data.len() - 4;
        let stored = u32::from_le_bytes([
            data[body_len],
            data[body_len + 1],
            data[body_len + 2],
            data[body_len + 3],
        ]);
        let computed = compute_crc32(&data[..body_len]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let body = &data[..body_len];
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported key type manifest version: {version}"
            )));
        }

        let count = u32::from_le_bytes([body[6], body[7], body[8], body[9]]) as usize;
        let mut cursor = 10;
        let mut names = BTreeSet::new();
        for _ in 0..count {
            if cursor + 2 > body.len() {
                return Err(CoreError::invalid_format("key type manifest too short"));
            }
            let len = usize::from(u16::from_le_bytes([body[cursor], body[cursor + 1]]));
            cursor += 2;

            if cursor + len > body.len() {
                return Err(CoreError::invalid_format("key type manifest too short"));
            }
            let name = std::str::from_utf8(&body[cursor..cursor + len])
                .map_err(|_| CoreError::invalid_format("invalid key type name"))?;
            names.insert(name.to_string());
            cursor += len;
        }

        Ok(Self { names })
    }
}
