//! Per-instance counters.
//!
//! All counters are atomic and can be read while operations are in
//! progress.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one index instance.
#[derive(Debug, Default)]
pub struct IndexStats {
    lookups: AtomicU64,
    key_listings: AtomicU64,
    updates: AtomicU64,
    storage_failures: AtomicU64,
    flushes: AtomicU64,
    compactions: AtomicU64,
    rebuild_wipes: AtomicU64,
}

impl IndexStats {
    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_key_listing(&self) {
        self.key_listings.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rebuild_wipe(&self) {
        self.rebuild_wipes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> IndexStatsSnapshot {
        IndexStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            key_listings: self.key_listings.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            rebuild_wipes: self.rebuild_wipes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`IndexStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStatsSnapshot {
    /// Key lookups served.
    pub lookups: u64,
    /// Full key listings served.
    pub key_listings: u64,
    /// File updates applied.
    pub updates: u64,
    /// Storage errors observed by reads, writes or flushes.
    pub storage_failures: u64,
    /// Flushes performed.
    pub flushes: u64,
    /// Log compactions performed.
    pub compactions: u64,
    /// Times the instance was wiped by a rebuild.
    pub rebuild_wipes: u64,
}
