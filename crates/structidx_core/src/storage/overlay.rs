//! Write buffer in front of persistent storage.

use super::file_map::FileMap;
use super::persistent::PersistentMap;
use crate::error::CoreResult;
use crate::key_type::IndexKey;
use std::collections::{HashMap, HashSet};
use structidx_codec::IndexValue;

/// In-memory write buffer layered over a [`PersistentMap`].
///
/// While buffering is enabled, stores land in the buffer and reads see the
/// buffer first. A buffered empty map is a pending removal. [`flush`]
/// drains the buffer into the persistent map.
///
/// [`flush`]: BufferedOverlay::flush
#[derive(Debug)]
pub struct BufferedOverlay<K, V> {
    persistent: PersistentMap<K, V>,
    buffer: HashMap<K, FileMap<V>>,
    enabled: bool,
}

impl<K: IndexKey, V: IndexValue> BufferedOverlay<K, V> {
    /// Wraps `persistent` with buffering initially `enabled` or not.
    #[must_use]
    pub fn new(persistent: PersistentMap<K, V>, enabled: bool) -> Self {
        Self {
            persistent,
            buffer: HashMap::new(),
            enabled,
        }
    }

    /// Returns the value for `key`, buffer first.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent map fails.
    pub fn get(&self, key: &K) -> CoreResult<Option<FileMap<V>>> {
        match self.buffer.get(key) {
            Some(map) if map.is_empty() => Ok(None),
            Some(map) => Ok(Some(map.clone())),
            None => self.persistent.get(key),
        }
    }

    /// Returns all live keys.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        let mut seen: HashSet<K> = HashSet::new();
        let mut keys = Vec::new();
        for key in self.persistent.keys() {
            if self.buffer.get(&key).is_some_and(FileMap::is_empty) {
                continue;
            }
            seen.insert(key.clone());
            keys.push(key);
        }
        for (key, map) in &self.buffer {
            if !map.is_empty() && !seen.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Stores `map` for `key`. An empty map removes the key.
    ///
    /// # Errors
    ///
    /// Returns an error if buffering is off and the persistent map fails.
    pub fn store(&mut self, key: &K, map: FileMap<V>) -> CoreResult<()> {
        if self.enabled {
            self.buffer.insert(key.clone(), map);
            Ok(())
        } else {
            self.buffer.remove(key);
            self.persistent.store(key, &map)
        }
    }

    /// Writes every buffered entry to the persistent map.
    ///
    /// Entries are removed from the buffer only once stored, so a failure
    /// leaves the rest buffered.
    ///
    /// # Errors
    ///
    /// Returns the first persistent store error.
    pub fn flush(&mut self) -> CoreResult<usize> {
        let pending: Vec<K> = self.buffer.keys().cloned().collect();
        let mut written = 0;
        for key in pending {
            if let Some(map) = self.buffer.get(&key) {
                self.persistent.store(&key, map)?;
                self.buffer.remove(&key);
                written += 1;
            }
        }
        Ok(written)
    }

    /// Drops the buffer without writing it.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Turns buffering on or off. Turning it off flushes first.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails; buffering stays on in that case.
    pub fn set_enabled(&mut self, enabled: bool) -> CoreResult<()> {
        if self.enabled && !enabled {
            self.flush()?;
        }
        self.enabled = enabled;
        Ok(())
    }

    /// Returns true while stores are buffered.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of buffered keys.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the underlying persistent map.
    #[must_use]
    pub fn persistent(&self) -> &PersistentMap<K, V> {
        &self.persistent
    }

    /// Returns the underlying persistent map mutably.
    pub fn persistent_mut(&mut self) -> &mut PersistentMap<K, V> {
        &mut self.persistent
    }
}
