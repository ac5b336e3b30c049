//! Index configuration.

use std::path::{Path, PathBuf};

/// Environment variable forcing a clean start when set to `1` or `true`.
pub const FORCE_CLEAN_ENV: &str = "STRUCTIDX_FORCE_CLEAN";

/// Environment variable selecting [`ExecutionMode::Deterministic`].
pub const DETERMINISTIC_ENV: &str = "STRUCTIDX_DETERMINISTIC";

/// How rebuilds are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Startup inconsistencies trigger an immediate forced rebuild; soft
    /// rebuild requests are deferred to the indexing scheduler.
    Production,
    /// Startup inconsistencies are only flagged; soft rebuild requests run
    /// synchronously so tests observe their effect immediately.
    Deterministic,
}

/// Configuration for opening an index registry.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Root directory holding every key type's data.
    pub root: PathBuf,

    /// Discard all on-disk data at startup regardless of version markers.
    pub force_clean: bool,

    /// Rebuild scheduling policy.
    pub execution_mode: ExecutionMode,

    /// Put a buffered overlay in front of each key type's storage.
    pub use_overlay: bool,

    /// Whether overlays start with buffering enabled.
    pub buffering_enabled: bool,

    /// Share of obsolete log records above which a flush compacts storage.
    pub compaction_ratio: f64,

    /// Minimum number of obsolete records before compaction is considered.
    pub compaction_min_records: usize,

    /// Whether flushes also sync storage to disk.
    pub sync_on_flush: bool,
}

impl IndexConfig {
    /// Creates a configuration rooted at `root` with default values.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            force_clean: false,
            execution_mode: ExecutionMode::Production,
            use_overlay: true,
            buffering_enabled: false,
            compaction_ratio: 0.5,
            compaction_min_records: 1024,
            sync_on_flush: true,
        }
    }

    /// Creates a configuration and applies environment overrides.
    ///
    /// `STRUCTIDX_FORCE_CLEAN` and `STRUCTIDX_DETERMINISTIC` accept `1` or
    /// `true` (case-insensitive).
    #[must_use]
    pub fn from_env(root: impl AsRef<Path>) -> Self {
        Self::with_overrides(root, |name| std::env::var(name).ok())
    }

    fn with_overrides(root: impl AsRef<Path>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(root);
        if is_set(lookup(FORCE_CLEAN_ENV)) {
            config.force_clean = true;
        }
        if is_set(lookup(DETERMINISTIC_ENV)) {
            config.execution_mode = ExecutionMode::Deterministic;
        }
        config
    }

    /// Sets whether to discard all data at startup.
    #[must_use]
    pub fn force_clean(mut self, value: bool) -> Self {
        self.force_clean = value;
        self
    }

    /// Sets the rebuild scheduling policy.
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Sets whether instances get a buffered overlay.
    #[must_use]
    pub fn use_overlay(mut self, value: bool) -> Self {
        self.use_overlay = value;
        self
    }

    /// Sets whether overlays start buffering.
    #[must_use]
    pub fn buffering_enabled(mut self, value: bool) -> Self {
        self.buffering_enabled = value;
        self
    }

    /// Sets the compaction thresholds.
    #[must_use]
    pub fn compaction(mut self, ratio: f64, min_records: usize) -> Self {
        self.compaction_ratio = ratio;
        self.compaction_min_records = min_records;
        self
    }

    /// Sets whether flushes sync to disk.
    #[must_use]
    pub fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Returns true in deterministic execution mode.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.execution_mode == ExecutionMode::Deterministic
    }
}

fn is_set(value: Option<String>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
