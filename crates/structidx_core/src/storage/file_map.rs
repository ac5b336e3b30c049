//! Per-key file contributions.

use crate::error::{CoreError, CoreResult};
use crate::types::FileId;
use std::collections::btree_map::{self, BTreeMap};
use structidx_codec::{decode_file_entries, encode_file_entries, IndexValue};

/// The value stored for one key: each contributing file with its value.
///
/// Iteration is in ascending file id order.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMap<V> {
    entries: BTreeMap<FileId, V>,
}

impl<V> Default for FileMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: IndexValue> FileMap<V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value contributed by `file_id`.
    #[must_use]
    pub fn get(&self, file_id: FileId) -> Option<&V> {
        self.entries.get(&file_id)
    }

    /// Sets the value contributed by `file_id`, returning the previous one.
    pub fn insert(&mut self, file_id: FileId, value: V) -> Option<V> {
        self.entries.insert(file_id, value)
    }

    /// Removes the contribution of `file_id`.
    pub fn remove(&mut self, file_id: FileId) -> Option<V> {
        self.entries.remove(&file_id)
    }

    /// Returns true if `file_id` contributes to this key.
    #[must_use]
    pub fn contains(&self, file_id: FileId) -> bool {
        self.entries.contains_key(&file_id)
    }

    /// Iterates contributions in ascending file id order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &V)> + '_ {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    /// Returns the contributing file ids in ascending order.
    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.entries.keys().copied()
    }

    /// Returns the number of contributing files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no file contributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the map as a record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be encoded.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        encode_file_entries(
            self.entries.iter().map(|(id, value)| (id.as_u32(), value)),
            &mut out,
        )?;
        Ok(out)
    }

    /// Decodes a record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed or has trailing bytes.
    pub fn decode(mut data: &[u8]) -> CoreResult<Self> {
        let entries = decode_file_entries::<V>(&mut data)?;
        if !data.is_empty() {
            return Err(CoreError::storage_corruption(format!(
                "{} trailing bytes after file map",
                data.len()
            )));
        }
        Ok(entries
            .into_iter()
            .map(|(id, value)| (FileId::new(id), value))
            .collect())
    }
}

impl<V: IndexValue> FromIterator<(FileId, V)> for FileMap<V> {
    fn from_iter<I: IntoIterator<Item = (FileId, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<V> IntoIterator for FileMap<V> {
    type Item = (FileId, V);
    type IntoIter = btree_map::IntoIter<FileId, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
