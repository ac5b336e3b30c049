//! Registry fixtures and common test data.

use crate::fakes::FakeHost;
use std::collections::HashMap;
use std::path::Path;
use structidx_core::{
    Declaration, EntryTag, ExecutionMode, IndexConfig, IndexRegistry, KeyType, ValueList,
};
use tempfile::TempDir;

/// Tag the fakes use for function entries.
pub const FUNCTION_TAG: EntryTag = EntryTag::new(1);

/// Tag the fakes use for class entries.
pub const CLASS_TAG: EntryTag = EntryTag::new(2);

/// Installs a tracing subscriber writing to the test output.
///
/// Honors `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A registry in a temporary directory, wired to a [`FakeHost`].
pub struct TestRegistry {
    /// The registry.
    pub registry: IndexRegistry,
    /// The fakes the registry talks to.
    pub host: FakeHost,
    /// The temporary directory (kept alive to prevent cleanup).
    temp: TempDir,
}

impl TestRegistry {
    /// Opens a deterministic registry in a fresh directory.
    pub fn deterministic(declarations: Vec<Declaration>) -> Self {
        Self::open(
            |config| config.execution_mode(ExecutionMode::Deterministic),
            declarations,
        )
    }

    /// Opens a production-mode registry in a fresh directory.
    pub fn production(declarations: Vec<Declaration>) -> Self {
        Self::open(|config| config, declarations)
    }

    /// Opens a registry in a fresh directory, letting `configure` adjust
    /// the default configuration.
    pub fn open(
        configure: impl FnOnce(IndexConfig) -> IndexConfig,
        declarations: Vec<Declaration>,
    ) -> Self {
        init_test_tracing();
        let temp = TempDir::new().expect("Failed to create temp directory");
        let host = FakeHost::new();
        let config = configure(IndexConfig::new(temp.path()));
        let registry = IndexRegistry::initialize(config, host.collaborators(), declarations)
            .expect("Failed to open index registry");
        Self {
            registry,
            host,
            temp,
        }
    }

    /// Closes the registry and opens a new one on the same directory with
    /// the same configuration and host.
    pub fn reopen(self, declarations: Vec<Declaration>) -> Self {
        let config = self.registry.config().clone();
        self.reopen_with(config, declarations)
    }

    /// Closes the registry and opens a new one on the same directory with
    /// a different configuration. The root is kept.
    pub fn reopen_with(self, config: IndexConfig, declarations: Vec<Declaration>) -> Self {
        self.reopen_after(config, declarations, |_| {})
    }

    /// Closes the registry, runs `between` on the closed root, then opens a
    /// new registry there.
    pub fn reopen_after(
        self,
        config: IndexConfig,
        declarations: Vec<Declaration>,
        between: impl FnOnce(&Path),
    ) -> Self {
        let Self {
            registry,
            host,
            temp,
        } = self;
        drop(registry);
        between(temp.path());

        let config = IndexConfig {
            root: temp.path().to_path_buf(),
            ..config
        };
        let registry = IndexRegistry::initialize(config, host.collaborators(), declarations)
            .expect("Failed to reopen index registry");
        Self {
            registry,
            host,
            temp,
        }
    }

    /// Returns the index root directory.
    pub fn root(&self) -> &Path {
        self.temp.path()
    }
}

impl std::ops::Deref for TestRegistry {
    type Target = IndexRegistry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

impl std::fmt::Debug for TestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRegistry")
            .field("registry", &self.registry)
            .field("root", &self.temp.path())
            .finish()
    }
}

/// A key type mapping function names to their positions.
pub fn functions_key_type(version: i32) -> KeyType<String> {
    KeyType::new("functions", version).with_entry_tag(FUNCTION_TAG)
}

/// A key type mapping class names to their positions.
pub fn classes_key_type(version: i32) -> KeyType<String> {
    KeyType::new("classes", version).with_entry_tag(CLASS_TAG)
}

/// Builds the entries one file contributes, as `(key, positions)` pairs.
pub fn entries(pairs: &[(&str, &[u32])]) -> HashMap<String, ValueList> {
    pairs
        .iter()
        .map(|(key, positions)| (key.to_string(), ValueList::from(positions.to_vec())))
        .collect()
}
