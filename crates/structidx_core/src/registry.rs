//! The index registry.
//!
//! The registry owns the index directory and one instance per declared key
//! type. Opening it validates every key type's version marker, recreates
//! storage that cannot be opened, deletes data of key types that are no
//! longer declared, and starts a rebuild if any data had to be discarded.
//!
//! ```no_run
//! use std::sync::Arc;
//! use structidx_core::{
//!     Collaborators, GlobalScope, IndexConfig, IndexRegistry, KeyType,
//! };
//! # fn collaborators() -> Collaborators { unimplemented!() }
//!
//! let functions: KeyType<String> = KeyType::new("fn.names", 1);
//! let registry = IndexRegistry::initialize(
//!     IndexConfig::new("/var/cache/project/index"),
//!     collaborators(),
//!     vec![functions.declaration()],
//! )?;
//!
//! let hits = registry.get(&functions, &"main".to_string(), &GlobalScope);
//! # Ok::<(), structidx_core::CoreError>(())
//! ```

use crate::config::IndexConfig;
use crate::dir::IndexDir;
use crate::error::{CoreError, CoreResult, QueryError};
use crate::external::{CancellationToken, Collaborators, SearchScope};
use crate::instance::{IndexInstance, ManagedIndex};
use crate::key_type::{Declaration, IndexKey, KeyType};
use crate::manifest::KeyTypeManifest;
use crate::rebuild::{RebuildCause, RebuildController};
use crate::reconcile::{Descriptor, Reconciler, ScanOutcome, StructuralPositions};
use crate::types::FileId;
use crate::version::VersionMarker;
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use structidx_codec::IndexValue;

/// What a key type's opener needs from the registry.
pub(crate) struct InstanceContext {
    pub(crate) config: IndexConfig,
    pub(crate) dir: Arc<IndexDir>,
    pub(crate) controller: Arc<RebuildController>,
}

/// An opened instance in type-erased form.
pub(crate) struct OpenedIndex {
    pub(crate) managed: Arc<dyn ManagedIndex>,
    /// The same instance, recovered by [`IndexRegistry::index`] with a downcast.
    pub(crate) typed: Arc<dyn Any + Send + Sync>,
    pub(crate) storage_failure: Option<String>,
}

/// Owner of every index instance.
pub struct IndexRegistry {
    config: IndexConfig,
    dir: Arc<IndexDir>,
    collaborators: Collaborators,
    controller: Arc<RebuildController>,
    instances: Vec<Arc<dyn ManagedIndex>>,
    typed: HashMap<String, Arc<dyn Any + Send + Sync>>,
    invalidated: Vec<String>,
    disposed: AtomicBool,
}

impl IndexRegistry {
    /// Opens the index directory and every declared key type.
    ///
    /// Key types whose data was discarded (forced clean start, missing or
    /// mismatched version marker, unopenable storage) trigger a rebuild: at
    /// once in production mode, as a pending request in deterministic mode.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexLocked`] if another registry holds the
    /// directory, [`CoreError::InvalidKeyType`] for duplicate or unsafe
    /// names, or an I/O error if the directory itself is unusable.
    pub fn initialize(
        config: IndexConfig,
        collaborators: Collaborators,
        declarations: Vec<Declaration>,
    ) -> CoreResult<Self> {
        validate_names(&declarations)?;

        let dir = Arc::new(IndexDir::open(&config.root)?);
        let controller = Arc::new(RebuildController::new(
            config.execution_mode,
            Arc::clone(&collaborators.scheduler),
        ));

        tracing::info!(
            root = %config.root.display(),
            key_types = declarations.len(),
            force_clean = config.force_clean,
            "opening index registry"
        );

        let mut declarations = declarations;
        declarations.sort_by(|a, b| a.name().cmp(b.name()));
        let declared: BTreeSet<String> =
            declarations.iter().map(|d| d.name().to_string()).collect();

        let mut invalidated = Vec::new();
        for declaration in &declarations {
            if check_marker(&dir, declaration, config.force_clean) {
                invalidated.push(declaration.name().to_string());
            }
        }

        let ctx = InstanceContext {
            config: config.clone(),
            dir: Arc::clone(&dir),
            controller: Arc::clone(&controller),
        };
        let mut instances = Vec::with_capacity(declarations.len());
        let mut typed = HashMap::with_capacity(declarations.len());
        let mut storage_failure = None;
        for declaration in declarations {
            let name = declaration.name().to_string();
            let opened = declaration.open(&ctx);
            if let Some(message) = opened.storage_failure {
                if !invalidated.contains(&name) {
                    invalidated.push(name.clone());
                }
                storage_failure.get_or_insert(RebuildCause::StorageFailure {
                    key_type: name,
                    message,
                });
            }
            typed.insert(opened.managed.name().to_string(), opened.typed);
            instances.push(opened.managed);
        }
        controller.register(&instances);

        remove_orphans(&dir, &declared)?;

        let registry = Self {
            config,
            dir,
            collaborators,
            controller,
            instances,
            typed,
            invalidated,
            disposed: AtomicBool::new(false),
        };

        if !registry.invalidated.is_empty() {
            let cause = match storage_failure {
                Some(cause) if registry.invalidated.len() == 1 => cause,
                _ => RebuildCause::VersionMismatch {
                    key_types: registry.invalidated.clone(),
                },
            };
            if registry.config.is_deterministic() {
                registry.controller.defer_rebuild(cause);
            } else {
                registry.controller.force_rebuild(cause);
            }
        }

        Ok(registry)
    }

    /// Returns the instance serving `key_type`, if it was declared here.
    ///
    /// Any handle whose name, version and key/value types match the
    /// declaration resolves, not only the handle that was declared.
    #[must_use]
    pub fn index<K: IndexKey, V: IndexValue>(
        &self,
        key_type: &KeyType<K, V>,
    ) -> Option<Arc<IndexInstance<K, V>>> {
        let Some(erased) = self.typed.get(key_type.name()) else {
            tracing::warn!(key_type = key_type.name(), "key type is not declared in this registry");
            return None;
        };
        let Ok(instance) = Arc::clone(erased).downcast::<IndexInstance<K, V>>() else {
            tracing::warn!(
                key_type = key_type.name(),
                "key type was declared with different key or value types"
            );
            return None;
        };
        if instance.version() != key_type.version() {
            tracing::warn!(
                key_type = key_type.name(),
                declared = instance.version(),
                requested = key_type.version(),
                "key type version does not match the declaration"
            );
            return None;
        }
        Some(instance)
    }

    /// Returns every live entry for `key` within `scope`.
    pub fn get<K, V>(
        &self,
        key_type: &KeyType<K, V>,
        key: &K,
        scope: &dyn SearchScope,
    ) -> Vec<Descriptor>
    where
        K: IndexKey,
        V: IndexValue + StructuralPositions,
    {
        let mut results = Vec::new();
        self.scan(key_type, key, scope, None, |descriptor| {
            results.push(descriptor);
            true
        });
        results
    }

    /// Like [`get`](Self::get), but stops when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Cancelled`] if the token was cancelled before
    /// every file was visited.
    pub fn get_cancellable<K, V>(
        &self,
        key_type: &KeyType<K, V>,
        key: &K,
        scope: &dyn SearchScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<Descriptor>, QueryError>
    where
        K: IndexKey,
        V: IndexValue + StructuralPositions,
    {
        let mut results = Vec::new();
        match self.scan(key_type, key, scope, Some(cancel), |descriptor| {
            results.push(descriptor);
            true
        }) {
            ScanOutcome::Cancelled => Err(QueryError::Cancelled),
            ScanOutcome::Completed | ScanOutcome::Stopped => Ok(results),
        }
    }

    /// Feeds live entries for `key` to `processor` until it returns false.
    ///
    /// Returns false if the processor stopped the scan.
    pub fn process<K, V, P>(
        &self,
        key_type: &KeyType<K, V>,
        key: &K,
        scope: &dyn SearchScope,
        processor: P,
    ) -> bool
    where
        K: IndexKey,
        V: IndexValue + StructuralPositions,
        P: FnMut(Descriptor) -> bool,
    {
        self.scan(key_type, key, scope, None, processor) != ScanOutcome::Stopped
    }

    /// Like [`process`](Self::process), but stops when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Cancelled`] if the token was cancelled before
    /// every file was visited.
    pub fn process_cancellable<K, V, P>(
        &self,
        key_type: &KeyType<K, V>,
        key: &K,
        scope: &dyn SearchScope,
        cancel: &CancellationToken,
        processor: P,
    ) -> Result<bool, QueryError>
    where
        K: IndexKey,
        V: IndexValue + StructuralPositions,
        P: FnMut(Descriptor) -> bool,
    {
        match self.scan(key_type, key, scope, Some(cancel), processor) {
            ScanOutcome::Cancelled => Err(QueryError::Cancelled),
            ScanOutcome::Stopped => Ok(false),
            ScanOutcome::Completed => Ok(true),
        }
    }

    fn scan<K, V, P>(
        &self,
        key_type: &KeyType<K, V>,
        key: &K,
        scope: &dyn SearchScope,
        cancel: Option<&CancellationToken>,
        processor: P,
    ) -> ScanOutcome
    where
        K: IndexKey,
        V: IndexValue + StructuralPositions,
        P: FnMut(Descriptor) -> bool,
    {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return ScanOutcome::Cancelled;
        }
        let Some(instance) = self.live_index(key_type) else {
            return ScanOutcome::Completed;
        };

        self.collaborators
            .scheduler
            .ensure_up_to_date(key_type.name(), scope);
        let hits = instance.get(key);

        let reconciler = Reconciler::new(
            self.collaborators.files.as_ref(),
            self.collaborators.parser.as_ref(),
            self.collaborators.scheduler.as_ref(),
            &self.controller,
            key_type.name(),
            instance.entry_tag(),
        );
        reconciler.scan(&hits, scope, cancel, processor)
    }

    /// Returns every stored key of `key_type` in ascending order.
    ///
    /// Keys are not reconciled against live structure.
    pub fn get_all_keys<K: IndexKey, V: IndexValue>(&self, key_type: &KeyType<K, V>) -> Vec<K> {
        self.live_index(key_type)
            .map(|instance| instance.get_all_keys())
            .unwrap_or_default()
    }

    /// Replaces what `file_id` contributes to `key_type`.
    ///
    /// `old_keys` lists the keys the file contributed before this update.
    pub fn update<K, V, F>(
        &self,
        key_type: &KeyType<K, V>,
        file_id: FileId,
        new_entries: HashMap<K, V>,
        old_keys: F,
    ) -> bool
    where
        K: IndexKey,
        V: IndexValue,
        F: FnOnce() -> HashSet<K>,
    {
        self.live_index(key_type)
            .is_some_and(|instance| instance.update_with_map(file_id, new_entries, old_keys))
    }

    /// Returns the names of all declared key types in ascending order.
    #[must_use]
    pub fn all_key_types(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.name().to_string()).collect()
    }

    /// Returns key types whose data was discarded while opening.
    #[must_use]
    pub fn invalidated_key_types(&self) -> &[String] {
        &self.invalidated
    }

    /// Returns true while a rebuild is requested or running.
    #[must_use]
    pub fn rebuild_needed(&self) -> bool {
        self.controller.is_rebuild_pending()
    }

    /// Returns the rebuild controller.
    #[must_use]
    pub fn rebuild_controller(&self) -> &Arc<RebuildController> {
        &self.controller
    }

    /// Runs a requested rebuild, if any. Returns true if one ran.
    pub fn process_pending_rebuild(&self) -> bool {
        self.controller.process_pending()
    }

    /// Flushes every instance.
    pub fn flush_all(&self) {
        if self.is_disposed() {
            return;
        }
        for instance in &self.instances {
            instance.flush_storage();
        }
    }

    /// Toggles write buffering on every instance.
    pub fn set_buffering_enabled(&self, enabled: bool) {
        if self.is_disposed() {
            return;
        }
        for instance in &self.instances {
            instance.set_buffering(enabled);
        }
    }

    /// Drops unflushed writes of every instance.
    pub fn clear_buffers(&self) {
        for instance in &self.instances {
            instance.discard_buffer();
        }
    }

    /// Returns the configuration the registry was opened with.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Flushes and closes every instance. Later calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for instance in &self.instances {
            instance.shutdown();
        }
        tracing::info!(root = %self.dir.path().display(), "index registry disposed");
    }

    /// Returns true once the registry was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn live_index<K: IndexKey, V: IndexValue>(
        &self,
        key_type: &KeyType<K, V>,
    ) -> Option<Arc<IndexInstance<K, V>>> {
        if self.is_disposed() {
            return None;
        }
        self.index(key_type)
    }
}

impl Drop for IndexRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("root", &self.dir.path())
            .field("key_types", &self.all_key_types())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn validate_names(declarations: &[Declaration]) -> CoreResult<()> {
    let mut seen = HashSet::new();
    for declaration in declarations {
        let name = declaration.name();
        if name.is_empty() || name.len() > 255 {
            return Err(CoreError::invalid_key_type(name, "name must be 1 to 255 bytes"));
        }
        if name.starts_with('.') {
            return Err(CoreError::invalid_key_type(name, "name must not start with '.'"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(CoreError::invalid_key_type(
                name,
                "name may only contain ASCII letters, digits, '.', '_' and '-'",
            ));
        }
        if name.eq_ignore_ascii_case("LOCK") || name.eq_ignore_ascii_case("KEYTYPES") {
            return Err(CoreError::invalid_key_type(name, "name is reserved"));
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(CoreError::invalid_key_type(name, "declared more than once"));
        }
    }
    Ok(())
}

/// Discards a key type's data if its marker does not match. Returns true
/// if data was discarded.
fn check_marker(dir: &IndexDir, declaration: &Declaration, force_clean: bool) -> bool {
    let name = declaration.name();
    let declared = declaration.version();

    let found = match dir.read_marker(name) {
        Ok(marker) => marker.map(|m| m.version),
        Err(err) => {
            tracing::warn!(key_type = name, error = %err, "unreadable version marker");
            None
        }
    };

    if !force_clean && found == Some(declared) {
        return false;
    }

    if force_clean {
        tracing::info!(key_type = name, "forced clean start, discarding index data");
    } else {
        let mismatch = CoreError::VersionMismatch {
            key_type: name.to_string(),
            declared,
            found,
        };
        tracing::info!(key_type = name, reason = %mismatch, "discarding index data");
    }

    // Storage opening recreates the directory if this fails.
    if let Err(err) = dir
        .remove_key_type(name)
        .and_then(|()| dir.write_marker(name, &VersionMarker::now(declared)))
    {
        tracing::error!(key_type = name, error = %err, "failed to reset key type directory");
    }
    true
}

fn remove_orphans(dir: &IndexDir, declared: &BTreeSet<String>) -> CoreResult<()> {
    // Without a readable manifest, whatever carries a marker on disk is known.
    let previous = dir
        .load_manifest()
        .unwrap_or_else(|| KeyTypeManifest::new(dir.scan_key_types()));
    for orphan in previous.orphans(declared) {
        match dir.remove_key_type(&orphan) {
            Ok(()) => tracing::info!(key_type = %orphan, "removed data of undeclared key type"),
            Err(err) => {
                tracing::warn!(key_type = %orphan, error = %err, "failed to remove orphaned key type");
            }
        }
    }
    dir.save_manifest(&KeyTypeManifest::new(declared.iter().cloned()))
}
