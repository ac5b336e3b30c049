//! Index instances.
//!
//! One instance serves one key type. Readers share a read lock on its
//! storage; an update holds the write lock for the whole file diff, so no
//! reader sees a key half written.
//!
//! Storage errors never escape to callers. Read failures force a global
//! rebuild and the read returns nothing; write failures log and leave a
//! deferred rebuild request.

use crate::dir::IndexDir;
use crate::error::CoreResult;
use crate::key_type::{IndexKey, KeyType};
use crate::rebuild::{RebuildCause, RebuildController};
use crate::registry::InstanceContext;
use crate::stats::{IndexStats, IndexStatsSnapshot};
use crate::storage::{FileMap, PersistentMap, StorageLayer};
use crate::types::{EntryTag, FileId};
use crate::version::VersionMarker;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use structidx_codec::IndexValue;

#[derive(Debug, Clone, Copy)]
struct FlushSettings {
    sync: bool,
    compaction_ratio: f64,
    compaction_min_records: usize,
}

/// Storage of one key type behind a read/write lock.
pub struct IndexInstance<K: IndexKey, V: IndexValue> {
    name: String,
    version: i32,
    entry_tag: Option<EntryTag>,
    layer: RwLock<StorageLayer<K, V>>,
    dir: Arc<IndexDir>,
    controller: Arc<RebuildController>,
    settings: FlushSettings,
    stats: IndexStats,
    disposed: AtomicBool,
}

pub(crate) struct OpenedInstance<K: IndexKey, V: IndexValue> {
    pub(crate) instance: Arc<IndexInstance<K, V>>,
    /// Set when on-disk data had to be discarded while opening.
    pub(crate) storage_failure: Option<String>,
}

impl<K: IndexKey, V: IndexValue> IndexInstance<K, V> {
    pub(crate) fn open(ctx: &InstanceContext, key_type: &KeyType<K, V>) -> OpenedInstance<K, V> {
        let (persistent, storage_failure) =
            open_storage::<K, V>(&ctx.dir, key_type.name(), key_type.version());
        let layer = StorageLayer::new(
            persistent,
            ctx.config.use_overlay,
            ctx.config.buffering_enabled,
        );
        let instance = Self::with_layer(
            key_type.name(),
            key_type.version(),
            key_type.entry_tag(),
            layer,
            Arc::clone(&ctx.dir),
            Arc::clone(&ctx.controller),
        )
        .with_flush_settings(
            ctx.config.sync_on_flush,
            ctx.config.compaction_ratio,
            ctx.config.compaction_min_records,
        );
        OpenedInstance {
            instance: Arc::new(instance),
            storage_failure,
        }
    }

    pub(crate) fn with_layer(
        name: &str,
        version: i32,
        entry_tag: Option<EntryTag>,
        layer: StorageLayer<K, V>,
        dir: Arc<IndexDir>,
        controller: Arc<RebuildController>,
    ) -> Self {
        Self {
            name: name.to_string(),
            version,
            entry_tag,
            layer: RwLock::new(layer),
            dir,
            controller,
            settings: FlushSettings {
                sync: true,
                compaction_ratio: 0.5,
                compaction_min_records: 1024,
            },
            stats: IndexStats::default(),
            disposed: AtomicBool::new(false),
        }
    }

    fn with_flush_settings(mut self, sync: bool, ratio: f64, min_records: usize) -> Self {
        self.settings = FlushSettings {
            sync,
            compaction_ratio: ratio,
            compaction_min_records: min_records,
        };
        self
    }

    /// Returns the key type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key type version.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the tag entries of this key type carry.
    #[must_use]
    pub fn entry_tag(&self) -> Option<EntryTag> {
        self.entry_tag
    }

    /// Returns the file contributions stored for `key`.
    ///
    /// A storage failure forces a global rebuild and yields an empty map.
    pub fn get(&self, key: &K) -> FileMap<V> {
        if self.is_disposed() {
            return FileMap::new();
        }
        self.stats.record_lookup();

        let result = self.layer.read().get(key);
        match result {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                self.read_failed(&err.to_string());
                FileMap::new()
            }
        }
    }

    /// Returns every stored key in ascending order.
    pub fn get_all_keys(&self) -> Vec<K> {
        if self.is_disposed() {
            return Vec::new();
        }
        self.stats.record_key_listing();

        let mut keys = self.layer.read().keys();
        keys.sort();
        keys
    }

    /// Replaces the contribution of `file_id`.
    ///
    /// Keys returned by `old_keys` but absent from `new_entries` lose the
    /// file's contribution, and are removed once no file contributes. Each
    /// key in `new_entries` gets the new value for the file.
    ///
    /// Returns false if the update could not be applied; a rebuild request
    /// is then left for the scheduler.
    pub fn update_with_map<F>(&self, file_id: FileId, new_entries: HashMap<K, V>, old_keys: F) -> bool
    where
        F: FnOnce() -> HashSet<K>,
    {
        if self.is_disposed() {
            return false;
        }
        let old_keys = old_keys();

        let result = {
            let mut layer = self.layer.write();
            apply_file_update(&mut layer, file_id, new_entries, &old_keys)
        };

        match result {
            Ok(()) => {
                self.stats.record_update();
                true
            }
            Err(err) => {
                self.stats.record_storage_failure();
                tracing::error!(
                    key_type = %self.name,
                    file_id = %file_id,
                    error = %err,
                    "index update failed"
                );
                self.controller.defer_rebuild(RebuildCause::StorageFailure {
                    key_type: self.name.clone(),
                    message: err.to_string(),
                });
                false
            }
        }
    }

    /// Writes buffered entries to the log and compacts it when enough of it
    /// is obsolete.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    pub fn flush(&self) -> CoreResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let mut layer = self.layer.write();
        layer.flush(self.settings.sync)?;
        self.stats.record_flush();

        let persistent = layer.persistent_mut();
        if persistent.should_compact(
            self.settings.compaction_ratio,
            self.settings.compaction_min_records,
        ) {
            let dropped = persistent.compact()?;
            self.stats.record_compaction();
            tracing::debug!(key_type = %self.name, dropped, "compacted index log");
        }
        Ok(())
    }

    /// Turns write buffering on or off. Turning it off flushes the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn set_buffering_enabled(&self, enabled: bool) -> CoreResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        self.layer.write().set_buffering_enabled(enabled)
    }

    /// Drops buffered writes without persisting them.
    pub fn clear_buffer(&self) {
        self.layer.write().clear_buffer();
    }

    /// Flushes and syncs the storage; the instance serves nothing afterwards.
    pub fn dispose(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut layer = self.layer.write();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = layer.flush(true) {
            tracing::error!(key_type = %self.name, error = %err, "failed to flush index on dispose");
        }
        tracing::debug!(key_type = %self.name, "index disposed");
    }

    /// Returns true once [`dispose`](Self::dispose) ran.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns true if the instance is backed by a file.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.layer.read().persistent().is_durable()
    }

    /// Returns the instance counters.
    #[must_use]
    pub fn stats(&self) -> IndexStatsSnapshot {
        self.stats.snapshot()
    }

    fn read_failed(&self, message: &str) {
        self.stats.record_storage_failure();
        tracing::error!(key_type = %self.name, error = message, "index read failed");
        self.controller.force_rebuild(RebuildCause::StorageFailure {
            key_type: self.name.clone(),
            message: message.to_string(),
        });
    }
}

impl<K: IndexKey, V: IndexValue> std::fmt::Debug for IndexInstance<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexInstance")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn apply_file_update<K: IndexKey, V: IndexValue>(
    layer: &mut StorageLayer<K, V>,
    file_id: FileId,
    new_entries: HashMap<K, V>,
    old_keys: &HashSet<K>,
) -> CoreResult<()> {
    for key in old_keys {
        if new_entries.contains_key(key) {
            continue;
        }
        if let Some(mut map) = layer.get(key)? {
            if map.remove(file_id).is_some() {
                layer.store(key, map)?;
            }
        }
    }

    for (key, value) in new_entries {
        let mut map = layer.get(&key)?.unwrap_or_default();
        if map.get(file_id) == Some(&value) {
            continue;
        }
        map.insert(file_id, value);
        layer.store(&key, map)?;
    }
    Ok(())
}

/// Opens the record log of a key type, recreating it once on failure.
///
/// Returns the reason on-disk data was discarded, if it was.
fn open_storage<K: IndexKey, V: IndexValue>(
    dir: &IndexDir,
    name: &str,
    version: i32,
) -> (PersistentMap<K, V>, Option<String>) {
    let path = dir.storage_path(name);
    let first_error = match PersistentMap::open_file(&path) {
        Ok(map) => return (map, None),
        Err(err) => err,
    };
    tracing::warn!(key_type = name, error = %first_error, "failed to open index storage, recreating");

    let retry = dir
        .remove_key_type(name)
        .and_then(|()| dir.write_marker(name, &VersionMarker::now(version)))
        .and_then(|()| PersistentMap::open_file(&path));

    match retry {
        Ok(map) => {
            tracing::info!(key_type = name, "recreated index storage");
            (map, Some(first_error.to_string()))
        }
        Err(err) => {
            tracing::error!(
                key_type = name,
                error = %err,
                "failed to recreate index storage, serving from memory"
            );
            (PersistentMap::in_memory(), Some(err.to_string()))
        }
    }
}

/// Type-erased view of an instance used by the registry and the rebuild
/// controller.
pub(crate) trait ManagedIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Flushes, deferring a rebuild on failure.
    fn flush_storage(&self);

    fn discard_buffer(&self);

    /// Toggles buffering, deferring a rebuild on failure.
    fn set_buffering(&self, enabled: bool);

    fn shutdown(&self);

    fn lock_for_rebuild(&self) -> Box<dyn RebuildGuard + '_>;
}

/// Write access to one instance held for the duration of a rebuild.
pub(crate) trait RebuildGuard {
    /// Drops all data and re-asserts the version marker.
    fn wipe(&mut self);
}

impl<K: IndexKey, V: IndexValue> ManagedIndex for IndexInstance<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush_storage(&self) {
        if let Err(err) = self.flush() {
            self.stats.record_storage_failure();
            tracing::error!(key_type = %self.name, error = %err, "index flush failed");
            self.controller.defer_rebuild(RebuildCause::StorageFailure {
                key_type: self.name.clone(),
                message: err.to_string(),
            });
        }
    }

    fn discard_buffer(&self) {
        self.clear_buffer();
    }

    fn set_buffering(&self, enabled: bool) {
        if let Err(err) = self.set_buffering_enabled(enabled) {
            self.stats.record_storage_failure();
            tracing::error!(key_type = %self.name, error = %err, "failed to toggle buffering");
            self.controller.defer_rebuild(RebuildCause::StorageFailure {
                key_type: self.name.clone(),
                message: err.to_string(),
            });
        }
    }

    fn shutdown(&self) {
        self.dispose();
    }

    fn lock_for_rebuild(&self) -> Box<dyn RebuildGuard + '_> {
        Box::new(InstanceRebuildGuard {
            instance: self,
            layer: self.layer.write(),
        })
    }
}

struct InstanceRebuildGuard<'a, K: IndexKey, V: IndexValue> {
    instance: &'a IndexInstance<K, V>,
    layer: RwLockWriteGuard<'a, StorageLayer<K, V>>,
}

impl<K: IndexKey, V: IndexValue> RebuildGuard for InstanceRebuildGuard<'_, K, V> {
    fn wipe(&mut self) {
        let instance = self.instance;
        self.layer.wipe();

        if !self.layer.persistent().is_durable() && !instance.is_disposed() {
            // A key type that fell back to memory gets another chance at disk.
            let path = instance.dir.storage_path(&instance.name);
            match PersistentMap::open_file(&path).and_then(|mut map| map.clear().map(|()| map)) {
                Ok(map) => {
                    *self.layer.persistent_mut() = map;
                    tracing::info!(key_type = %instance.name, "index storage restored on disk");
                }
                Err(err) => {
                    tracing::debug!(key_type = %instance.name, error = %err, "index storage still unavailable");
                }
            }
        }

        if let Err(err) = instance.dir.ensure_marker(&instance.name, instance.version) {
            tracing::error!(key_type = %instance.name, error = %err, "failed to write version marker");
        }
        instance.stats.record_rebuild_wipe();
    }
}
