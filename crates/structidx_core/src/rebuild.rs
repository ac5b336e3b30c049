//! Rebuild control.
//!
//! ```text
//! NORMAL ──request──▶ REBUILD_REQUESTED ──run──▶ REBUILDING ──▶ NORMAL
//!    └──────────────────force─────────────────────────▲
//! ```
//!
//! A rebuild always covers every key type: positions stored by different
//! key types refer to the same structural trees, so one stale key type
//! makes the others suspect too.
//!
//! Lock order: the rebuild serializer first, then every instance write lock
//! in ascending key type name order. The state mutex is never held while
//! acquiring an instance lock.

use crate::config::ExecutionMode;
use crate::error::FailureKind;
use crate::external::IndexingScheduler;
use crate::instance::ManagedIndex;
use crate::types::FileId;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Why a rebuild was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildCause {
    /// Stored data was written with another schema version, or a forced
    /// clean start discarded it.
    VersionMismatch {
        /// Affected key types.
        key_types: Vec<String>,
    },
    /// A key type's storage failed.
    StorageFailure {
        /// Affected key type.
        key_type: String,
        /// Error description.
        message: String,
    },
    /// A stored position pointed past the end of a file's live tree.
    ReconciliationDrift {
        /// File whose structure drifted.
        file_id: FileId,
    },
    /// The host asked for a rebuild.
    Requested,
}

impl RebuildCause {
    /// Returns the failure kind behind this cause, if any.
    #[must_use]
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::VersionMismatch { .. } => Some(FailureKind::VersionMismatch),
            Self::StorageFailure { .. } => Some(FailureKind::StorageCorruption),
            Self::ReconciliationDrift { .. } => Some(FailureKind::ReconciliationDrift),
            Self::Requested => None,
        }
    }
}

/// State of the rebuild controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildState {
    /// No rebuild pending.
    Normal,
    /// A rebuild was requested and waits for [`RebuildController::process_pending`].
    RebuildRequested,
    /// A rebuild is running.
    Rebuilding,
}

#[derive(Debug)]
struct ControlState {
    state: RebuildState,
    pending: Option<RebuildCause>,
}

/// Reacts to version mismatches, storage failures and drift by wiping all
/// key types and asking the scheduler for a full reindex.
pub struct RebuildController {
    mode: ExecutionMode,
    scheduler: Arc<dyn IndexingScheduler>,
    control: Mutex<ControlState>,
    instances: RwLock<Vec<Weak<dyn ManagedIndex>>>,
    serial: Mutex<()>,
    completed: AtomicU64,
    last_cause: Mutex<Option<RebuildCause>>,
}

impl RebuildController {
    /// Creates a controller in the normal state.
    pub fn new(mode: ExecutionMode, scheduler: Arc<dyn IndexingScheduler>) -> Self {
        Self {
            mode,
            scheduler,
            control: Mutex::new(ControlState {
                state: RebuildState::Normal,
                pending: None,
            }),
            instances: RwLock::new(Vec::new()),
            serial: Mutex::new(()),
            completed: AtomicU64::new(0),
            last_cause: Mutex::new(None),
        }
    }

    /// Sets the instances a rebuild wipes.
    pub(crate) fn register(&self, instances: &[Arc<dyn ManagedIndex>]) {
        let mut sorted: Vec<&Arc<dyn ManagedIndex>> = instances.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));
        *self.instances.write() = sorted.into_iter().map(Arc::downgrade).collect();
    }

    /// Returns the execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> RebuildState {
        self.control.lock().state
    }

    /// Returns true if a rebuild is requested or running.
    #[must_use]
    pub fn is_rebuild_pending(&self) -> bool {
        self.state() != RebuildState::Normal
    }

    /// Returns the number of completed rebuilds.
    #[must_use]
    pub fn rebuild_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Returns the cause of the last completed rebuild.
    #[must_use]
    pub fn last_cause(&self) -> Option<RebuildCause> {
        self.last_cause.lock().clone()
    }

    /// Returns the cause waiting for the next rebuild.
    #[must_use]
    pub fn pending_cause(&self) -> Option<RebuildCause> {
        self.control.lock().pending.clone()
    }

    /// Soft request. Queries keep running on the current data.
    ///
    /// In deterministic mode the rebuild runs before this returns.
    pub fn request_rebuild(&self, cause: RebuildCause) {
        match self.mode {
            ExecutionMode::Deterministic => self.force_rebuild(cause),
            ExecutionMode::Production => self.defer_rebuild(cause),
        }
    }

    /// Marks a rebuild as requested without running it in either mode.
    pub fn defer_rebuild(&self, cause: RebuildCause) {
        let mut control = self.control.lock();
        tracing::info!(cause = ?cause, "rebuild requested");
        if control.pending.is_none() {
            control.pending = Some(cause);
        }
        if control.state == RebuildState::Normal {
            control.state = RebuildState::RebuildRequested;
        }
    }

    /// Runs a requested rebuild. Returns false if none was pending.
    pub fn process_pending(&self) -> bool {
        let cause = {
            let mut control = self.control.lock();
            if control.state != RebuildState::RebuildRequested {
                return false;
            }
            control.pending.take().unwrap_or(RebuildCause::Requested)
        };
        self.force_rebuild(cause);
        true
    }

    /// Wipes every key type now, then notifies the scheduler.
    pub fn force_rebuild(&self, cause: RebuildCause) {
        let serial = self.serial.lock();
        {
            let mut control = self.control.lock();
            control.state = RebuildState::Rebuilding;
            control.pending = None;
        }
        tracing::info!(cause = ?cause, "rebuild started");

        let instances: Vec<Arc<dyn ManagedIndex>> = self
            .instances
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        {
            let mut guards: Vec<_> = instances.iter().map(|i| i.lock_for_rebuild()).collect();
            for guard in &mut guards {
                guard.wipe();
            }
        }

        let count = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        *self.last_cause.lock() = Some(cause);
        {
            let mut control = self.control.lock();
            control.state = if control.pending.is_some() {
                RebuildState::RebuildRequested
            } else {
                RebuildState::Normal
            };
        }
        drop(serial);

        tracing::info!(key_types = instances.len(), rebuilds = count, "rebuild finished");
        self.scheduler.schedule_full_reindex();
    }
}

impl std::fmt::Debug for RebuildController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildController")
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("rebuilds", &self.rebuild_count())
            .finish_non_exhaustive()
    }
}
