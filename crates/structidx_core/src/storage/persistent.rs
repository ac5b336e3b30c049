//! Durable key→file-map storage for one key type.
//!
//! Values live in an append-only record log. An in-memory table maps each
//! live key to the offset of its latest `Put` record; it is rebuilt by
//! replaying the log on open. Superseded records stay in the log until
//! [`PersistentMap::compact`] rewrites it.

use super::file_map::FileMap;
use super::record::{LogRecord, RecordKind};
use crate::error::{CoreError, CoreResult};
use crate::key_type::IndexKey;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use structidx_codec::IndexValue;
use structidx_storage::{FileBackend, InMemoryBackend, StorageBackend};

#[derive(Debug, Clone, Copy)]
struct RecordLocation {
    offset: u64,
    len: usize,
}

/// On-disk map from keys to [`FileMap`]s.
pub struct PersistentMap<K, V> {
    backend: Box<dyn StorageBackend>,
    index: HashMap<K, RecordLocation>,
    total_records: usize,
    obsolete_records: usize,
    durable: bool,
    _value: PhantomData<fn() -> V>,
}

impl<K: IndexKey, V: IndexValue> PersistentMap<K, V> {
    /// Opens the record log at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the log is corrupt.
    pub fn open_file(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        let mut map = Self::open(Box::new(backend))?;
        map.durable = true;
        Ok(map)
    }

    /// Opens a map over an existing backend by replaying its log.
    ///
    /// A record cut short at the end of the log is dropped: it is what an
    /// interrupted append leaves behind.
    ///
    /// # Errors
    ///
    /// Returns an error if any complete record fails its checksum or
    /// cannot be decoded.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let mut map = Self {
            backend,
            index: HashMap::new(),
            total_records: 0,
            obsolete_records: 0,
            durable: false,
            _value: PhantomData,
        };
        map.replay()?;
        Ok(map)
    }

    /// Creates an empty map that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(InMemoryBackend::new()),
            index: HashMap::new(),
            total_records: 0,
            obsolete_records: 0,
            durable: false,
            _value: PhantomData,
        }
    }

    fn replay(&mut self) -> CoreResult<()> {
        let size = self.backend.size()?;
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < LogRecord::MIN_SIZE as u64 {
                break;
            }

            let prefix = self.backend.read_at(offset, 4)?;
            let record_len = LogRecord::peek_len(&prefix).unwrap_or(0);
            if record_len < LogRecord::MIN_SIZE {
                return Err(CoreError::storage_corruption(format!(
                    "invalid record length {record_len} at offset {offset}"
                )));
            }
            if record_len as u64 > remaining {
                break;
            }

            let data = self.backend.read_at(offset, record_len)?;
            let record = match LogRecord::decode(&data) {
                Ok(record) => record,
                Err(CoreError::ChecksumMismatch { .. }) if offset + record_len as u64 == size => {
                    break;
                }
                Err(err) => return Err(err),
            };

            let key = K::from_bytes(&record.key)?;
            match record.kind {
                RecordKind::Put => {
                    let location = RecordLocation {
                        offset,
                        len: record_len,
                    };
                    if self.index.insert(key, location).is_some() {
                        self.obsolete_records += 1;
                    }
                }
                RecordKind::Remove => {
                    if self.index.remove(&key).is_some() {
                        self.obsolete_records += 1;
                    }
                    self.obsolete_records += 1;
                }
            }
            self.total_records += 1;
            offset += record_len as u64;
        }

        if offset < size {
            tracing::warn!(
                offset,
                size,
                "dropping incomplete record at end of index log"
            );
            self.backend.truncate(offset)?;
        }
        Ok(())
    }

    /// Returns the file map stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn get(&self, key: &K) -> CoreResult<Option<FileMap<V>>> {
        let Some(location) = self.index.get(key) else {
            return Ok(None);
        };
        let data = self.backend.read_at(location.offset, location.len)?;
        let record = LogRecord::decode(&data)?;
        if record.kind != RecordKind::Put {
            return Err(CoreError::storage_corruption(format!(
                "index points at a non-put record at offset {}",
                location.offset
            )));
        }
        FileMap::decode(&record.payload).map(Some)
    }

    /// Returns true if `key` has a stored value.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns all stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.index.keys().cloned().collect()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Stores `map` for `key`. An empty map removes the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or appended.
    pub fn store(&mut self, key: &K, map: &FileMap<V>) -> CoreResult<()> {
        if map.is_empty() {
            self.remove(key)?;
            return Ok(());
        }

        let record = LogRecord::put(key.to_bytes(), map.encode()?);
        let encoded = record.encode()?;
        let offset = self.backend.append(&encoded)?;
        let location = RecordLocation {
            offset,
            len: encoded.len(),
        };
        if self.index.insert(key.clone(), location).is_some() {
            self.obsolete_records += 1;
        }
        self.total_records += 1;
        Ok(())
    }

    /// Removes `key`. Returns false if it was not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal record cannot be appended.
    pub fn remove(&mut self, key: &K) -> CoreResult<bool> {
        if !self.index.contains_key(key) {
            return Ok(false);
        }
        let encoded = LogRecord::remove(key.to_bytes()).encode()?;
        self.backend.append(&encoded)?;
        self.index.remove(key);
        // Both the superseded put and the removal itself are dead weight.
        self.obsolete_records += 2;
        self.total_records += 1;
        Ok(true)
    }

    /// Flushes appended records, syncing them to disk if `sync` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn flush(&mut self, sync: bool) -> CoreResult<()> {
        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Returns true once obsolete records exceed both thresholds.
    #[must_use]
    pub fn should_compact(&self, ratio: f64, min_records: usize) -> bool {
        if self.total_records == 0 || self.obsolete_records < min_records {
            return false;
        }
        self.obsolete_records as f64 / self.total_records as f64 > ratio
    }

    /// Rewrites the log with only the latest record of each live key.
    ///
    /// Returns the number of records dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a live record cannot be read or the new log
    /// cannot be written. The old log stays in place on error.
    pub fn compact(&mut self) -> CoreResult<usize> {
        let mut entries: Vec<(K, RecordLocation)> =
            self.index.iter().map(|(k, loc)| (k.clone(), *loc)).collect();
        entries.sort_by_key(|(_, loc)| loc.offset);

        let mut data = Vec::new();
        let mut relocated = HashMap::with_capacity(entries.len());
        for (key, location) in entries {
            let bytes = self.backend.read_at(location.offset, location.len)?;
            let new_location = RecordLocation {
                offset: data.len() as u64,
                len: bytes.len(),
            };
            data.extend_from_slice(&bytes);
            relocated.insert(key, new_location);
        }

        self.backend.replace_contents(&data)?;
        let dropped = self.total_records - relocated.len();
        self.index = relocated;
        self.total_records = self.index.len();
        self.obsolete_records = 0;
        Ok(dropped)
    }

    /// Drops every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be truncated.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.backend.truncate(0)?;
        self.index.clear();
        self.total_records = 0;
        self.obsolete_records = 0;
        Ok(())
    }

    /// Returns the number of records in the log.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.total_records
    }

    /// Returns the number of superseded or removal records in the log.
    #[must_use]
    pub fn obsolete_count(&self) -> usize {
        self.obsolete_records
    }

    /// Returns true if the map is backed by a file.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

impl<K, V> std::fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentMap")
            .field("keys", &self.index.len())
            .field("total_records", &self.total_records)
            .field("obsolete_records", &self.obsolete_records)
            .field("durable", &self.durable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileId;
    use structidx_codec::ValueList;
    use tempfile::tempdir;

    fn map_of(entries: &[(u32, &[u32])]) -> FileMap<ValueList> {
        entries
            .iter()
            .map(|(id, positions)| (FileId::new(*id), ValueList::from(positions.to_vec())))
            .collect()
    }

    #[test]
    fn store_get_remove() {
        let mut map = PersistentMap::<String, ValueList>::in_memory();
        let key = "alpha".to_string();
        map.store(&key, &map_of(&[(1, &[0, 2])])).unwrap();

        assert_eq!(map.get(&key).unwrap(), Some(map_of(&[(1, &[0, 2])])));
        assert!(map.remove(&key).unwrap());
        assert!(map.get(&key).unwrap().is_none());
        assert!(!map.remove(&key).unwrap());
    }

    #[test]
    fn empty_map_removes_key() {
        let mut map = PersistentMap::<String, ValueList>::in_memory();
        let key = "alpha".to_string();
        map.store(&key, &map_of(&[(1, &[3])])).unwrap();
        map.store(&key, &FileMap::new()).unwrap();
        assert!(!map.contains(&key));
    }

    #[test]
    fn reopen_replays_latest_values() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("storage.dat");
        {
            let mut map = PersistentMap::<String, ValueList>::open_file(&path).unwrap();
            map.store(&"a".to_string(), &map_of(&[(1, &[1])])).unwrap();
            map.store(&"a".to_string(), &map_of(&[(1, &[2])])).unwrap();
            map.store(&"b".to_string(), &map_of(&[(2, &[5])])).unwrap();
            map.remove(&"b".to_string()).unwrap();
            map.flush(true).unwrap();
        }

        let map = PersistentMap::<String, ValueList>::open_file(&path).unwrap();
        assert!(map.is_durable());
        assert_eq!(map.keys(), vec!["a".to_string()]);
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(map_of(&[(1, &[2])])));
        assert_eq!(map.record_count(), 4);
        assert_eq!(map.obsolete_count(), 3);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let mut backend = InMemoryBackend::new();
        let good = LogRecord::put(b"a".to_vec(), map_of(&[(1, &[1])]).encode().unwrap())
            .encode()
            .unwrap();
        let torn = LogRecord::put(b"b".to_vec(), map_of(&[(2, &[2])]).encode().unwrap())
            .encode()
            .unwrap();
        backend.append(&good).unwrap();
        backend.append(&torn[..torn.len() - 3]).unwrap();

        let map = PersistentMap::<String, ValueList>::open(Box::new(backend)).unwrap();
        assert_eq!(map.keys(), vec!["a".to_string()]);
    }

    #[test]
    fn corrupt_record_fails_open() {
        let first = LogRecord::put(b"a".to_vec(), map_of(&[(1, &[1])]).encode().unwrap())
            .encode()
            .unwrap();
        let second = LogRecord::put(b"b".to_vec(), map_of(&[(2, &[2])]).encode().unwrap())
            .encode()
            .unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second);
        data[LogRecord::HEADER_SIZE] ^= 0xFF;

        let result = PersistentMap::<String, ValueList>::open(Box::new(
            InMemoryBackend::with_data(data),
        ));
        assert!(result.is_err());
    }

    #[test]
    fn compaction_keeps_live_records() {
        let mut map = PersistentMap::<String, ValueList>::in_memory();
        for round in 0..10u32 {
            map.store(&"hot".to_string(), &map_of(&[(1, &[round])])).unwrap();
        }
        map.store(&"cold".to_string(), &map_of(&[(2, &[7])])).unwrap();
        map.store(&"gone".to_string(), &map_of(&[(3, &[1])])).unwrap();
        map.remove(&"gone".to_string()).unwrap();

        assert!(map.should_compact(0.5, 4));
        let dropped = map.compact().unwrap();
        assert_eq!(dropped, 11);
        assert_eq!(map.record_count(), 2);
        assert_eq!(map.obsolete_count(), 0);
        assert!(!map.should_compact(0.5, 4));
        assert_eq!(map.get(&"hot".to_string()).unwrap(), Some(map_of(&[(1, &[9])])));
        assert_eq!(map.get(&"cold".to_string()).unwrap(), Some(map_of(&[(2, &[7])])));
    }

    #[test]
    fn compacted_file_reopens() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("storage.dat");
        {
            let mut map = PersistentMap::<String, ValueList>::open_file(&path).unwrap();
            for round in 0..5u32 {
                map.store(&"k".to_string(), &map_of(&[(1, &[round])])).unwrap();
            }
            map.compact().unwrap();
            map.flush(true).unwrap();
        }
        let map = PersistentMap::<String, ValueList>::open_file(&path).unwrap();
        assert_eq!(map.record_count(), 1);
        assert_eq!(map.get(&"k".to_string()).unwrap(), Some(map_of(&[(1, &[4])])));
    }

    #[test]
    fn clear_empties_log() {
        let mut map = PersistentMap::<String, ValueList>::in_memory();
        map.store(&"a".to_string(), &map_of(&[(1, &[1])])).unwrap();
        map.clear().unwrap();
        assert!(map.is_empty());
        assert_eq!(map.record_count(), 0);
    }

    proptest::proptest! {
        #[test]
        fn replay_matches_model(ops in proptest::collection::vec((0u8..6, proptest::option::of(0u32..50)), 0..40)) {
            let temp = tempdir().unwrap();
            let path = temp.path().join("storage.dat");
            let mut model = std::collections::HashMap::new();
            {
                let mut map = PersistentMap::<String, ValueList>::open_file(&path).unwrap();
                for (key, value) in &ops {
                    let key = format!("k{key}");
                    match value {
                        Some(position) => {
                            let stored = map_of(&[(1, &[*position])]);
                            map.store(&key, &stored).unwrap();
                            model.insert(key, stored);
                        }
                        None => {
                            map.remove(&key).unwrap();
                            model.remove(&key);
                        }
                    }
                }
                map.flush(true).unwrap();
            }

            let map = PersistentMap::<String, ValueList>::open_file(&path).unwrap();
            proptest::prop_assert_eq!(map.len(), model.len());
            for (key, stored) in &model {
                let loaded = map.get(key).unwrap();
                proptest::prop_assert_eq!(loaded.as_ref(), Some(stored));
            }
        }
    }
}
