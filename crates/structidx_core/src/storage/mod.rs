//! Key→value storage for one key type.
//!
//! - [`PersistentMap`] keeps the durable record log.
//! - [`BufferedOverlay`] buffers writes in memory in front of it.
//! - [`StorageLayer`] is the shape an index instance actually owns, fixed
//!   when the instance is created.

mod file_map;
mod overlay;
mod persistent;
mod record;

pub use file_map::FileMap;
pub use overlay::BufferedOverlay;
pub use persistent::PersistentMap;
pub use record::{LogRecord, RecordKind};

use crate::error::CoreResult;
use crate::key_type::IndexKey;
use structidx_codec::IndexValue;

/// Storage owned by an index instance.
#[derive(Debug)]
pub enum StorageLayer<K, V> {
    /// Writes go straight to the record log.
    PersistentOnly(PersistentMap<K, V>),
    /// Writes can be buffered in memory.
    Buffered(BufferedOverlay<K, V>),
}

impl<K: IndexKey, V: IndexValue> StorageLayer<K, V> {
    /// Builds the layer for `persistent`.
    #[must_use]
    pub fn new(persistent: PersistentMap<K, V>, use_overlay: bool, buffering: bool) -> Self {
        if use_overlay {
            Self::Buffered(BufferedOverlay::new(persistent, buffering))
        } else {
            Self::PersistentOnly(persistent)
        }
    }

    /// Returns the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record cannot be read.
    pub fn get(&self, key: &K) -> CoreResult<Option<FileMap<V>>> {
        match self {
            Self::PersistentOnly(map) => map.get(key),
            Self::Buffered(overlay) => overlay.get(key),
        }
    }

    /// Returns all live keys.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        match self {
            Self::PersistentOnly(map) => map.keys(),
            Self::Buffered(overlay) => overlay.keys(),
        }
    }

    /// Stores `map` for `key`; an empty map removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn store(&mut self, key: &K, map: FileMap<V>) -> CoreResult<()> {
        match self {
            Self::PersistentOnly(persistent) => persistent.store(key, &map),
            Self::Buffered(overlay) => overlay.store(key, map),
        }
    }

    /// Drains any buffer and flushes the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn flush(&mut self, sync: bool) -> CoreResult<()> {
        if let Self::Buffered(overlay) = self {
            overlay.flush()?;
        }
        self.persistent_mut().flush(sync)
    }

    /// Drops buffered writes. No-op without an overlay.
    pub fn clear_buffer(&mut self) {
        if let Self::Buffered(overlay) = self {
            overlay.clear_buffer();
        }
    }

    /// Toggles buffering. No-op without an overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if disabling needs a flush that fails.
    pub fn set_buffering_enabled(&mut self, enabled: bool) -> CoreResult<()> {
        match self {
            Self::PersistentOnly(_) => Ok(()),
            Self::Buffered(overlay) => overlay.set_enabled(enabled),
        }
    }

    /// Returns the persistent map.
    #[must_use]
    pub fn persistent(&self) -> &PersistentMap<K, V> {
        match self {
            Self::PersistentOnly(map) => map,
            Self::Buffered(overlay) => overlay.persistent(),
        }
    }

    /// Returns the persistent map mutably.
    pub fn persistent_mut(&mut self) -> &mut PersistentMap<K, V> {
        match self {
            Self::PersistentOnly(map) => map,
            Self::Buffered(overlay) => overlay.persistent_mut(),
        }
    }

    /// Discards every stored and buffered value.
    ///
    /// If the log cannot be truncated the persistent map is swapped for an
    /// empty in-memory one.
    pub fn wipe(&mut self) {
        self.clear_buffer();
        let persistent = self.persistent_mut();
        if let Err(err) = persistent.clear() {
            tracing::error!(error = %err, "failed to truncate index log, continuing in memory");
            *persistent = PersistentMap::in_memory();
        }
    }
}
