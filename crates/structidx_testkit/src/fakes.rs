//! In-memory stand-ins for the index's collaborators.
//!
//! [`FakeHost`] bundles a file registry, a parser and a scheduler that
//! share one view of the "workspace", so a test can edit a file's structure
//! and watch how queries and the scheduler react.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use structidx_core::{
    Collaborators, CoreError, CoreResult, EntryTag, FileHandle, FileId, FileRegistry,
    IndexingScheduler, SearchScope, StructuralEntry, StructuralParser, StructuralTree,
};

/// File registry backed by a map.
#[derive(Debug, Default)]
pub struct MemoryFileRegistry {
    files: Mutex<HashMap<FileId, FileHandle>>,
}

impl MemoryFileRegistry {
    /// Registers a file and returns its handle.
    pub fn add(&self, id: u32, path: impl Into<PathBuf>) -> FileHandle {
        let handle = FileHandle::new(FileId::new(id), path);
        self.files.lock().insert(handle.id, handle.clone());
        handle
    }

    /// Forgets a file, as if it was deleted.
    pub fn remove(&self, id: FileId) {
        self.files.lock().remove(&id);
    }
}

impl FileRegistry for MemoryFileRegistry {
    fn resolve(&self, id: FileId) -> Option<FileHandle> {
        self.files.lock().get(&id).cloned()
    }
}

/// Parser serving trees set by the test.
///
/// Each file has a live tree and a cached tree. [`set_tree`] updates both;
/// [`edit_file`] updates only the live one, leaving a stale cache behind
/// until [`StructuralParser::rebuild_tree`] is called.
///
/// [`set_tree`]: FakeParser::set_tree
/// [`edit_file`]: FakeParser::edit_file
#[derive(Debug, Default)]
pub struct FakeParser {
    live: Mutex<HashMap<FileId, Arc<StructuralTree>>>,
    cache: Mutex<HashMap<FileId, Arc<StructuralTree>>>,
    unavailable: Mutex<HashSet<FileId>>,
    cached_calls: AtomicUsize,
    rebuild_calls: AtomicUsize,
}

impl FakeParser {
    /// Sets the live and cached tree of a file.
    pub fn set_tree(&self, id: FileId, tree: StructuralTree) {
        let tree = Arc::new(tree);
        self.live.lock().insert(id, Arc::clone(&tree));
        self.cache.lock().insert(id, tree);
    }

    /// Changes the live tree only.
    pub fn edit_file(&self, id: FileId, tree: StructuralTree) {
        self.live.lock().insert(id, Arc::new(tree));
    }

    /// Makes parsing `id` fail until [`restore`](Self::restore) is called.
    pub fn make_unavailable(&self, id: FileId) {
        self.unavailable.lock().insert(id);
    }

    /// Undoes [`make_unavailable`](Self::make_unavailable).
    pub fn restore(&self, id: FileId) {
        self.unavailable.lock().remove(&id);
    }

    /// Returns how often a cached tree was requested.
    pub fn cached_calls(&self) -> usize {
        self.cached_calls.load(Ordering::SeqCst)
    }

    /// Returns how often a fresh parse was requested.
    pub fn rebuild_calls(&self) -> usize {
        self.rebuild_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self, file: &FileHandle) -> CoreResult<()> {
        if self.unavailable.lock().contains(&file.id) {
            return Err(CoreError::resource_unavailable(format!(
                "cannot parse {}",
                file.path.display()
            )));
        }
        Ok(())
    }
}

impl StructuralParser for FakeParser {
    fn parse_or_get_cached_tree(&self, file: &FileHandle) -> CoreResult<Arc<StructuralTree>> {
        self.cached_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available(file)?;
        if let Some(tree) = self.cache.lock().get(&file.id) {
            return Ok(Arc::clone(tree));
        }
        self.rebuild_tree(file)
    }

    fn rebuild_tree(&self, file: &FileHandle) -> CoreResult<Arc<StructuralTree>> {
        self.rebuild_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available(file)?;
        let tree = self
            .live
            .lock()
            .get(&file.id)
            .cloned()
            .ok_or_else(|| CoreError::resource_unavailable(format!("no structure for {}", file.id)))?;
        self.cache.lock().insert(file.id, Arc::clone(&tree));
        Ok(tree)
    }
}

/// Scheduler that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    enqueued: Mutex<Vec<FileId>>,
    up_to_date: Mutex<Vec<String>>,
    full_reindexes: AtomicUsize,
}

impl RecordingScheduler {
    /// Returns the files enqueued for reindexing, in order.
    pub fn enqueued(&self) -> Vec<FileId> {
        self.enqueued.lock().clone()
    }

    /// Returns the key types queries asked to bring up to date.
    pub fn up_to_date_requests(&self) -> Vec<String> {
        self.up_to_date.lock().clone()
    }

    /// Returns how many full reindexes were scheduled.
    pub fn full_reindexes(&self) -> usize {
        self.full_reindexes.load(Ordering::SeqCst)
    }

    /// Forgets everything recorded so far.
    pub fn reset(&self) {
        self.enqueued.lock().clear();
        self.up_to_date.lock().clear();
        self.full_reindexes.store(0, Ordering::SeqCst);
    }
}

impl IndexingScheduler for RecordingScheduler {
    fn enqueue_reindex(&self, file: &FileHandle) {
        self.enqueued.lock().push(file.id);
    }

    fn ensure_up_to_date(&self, key_type: &str, _scope: &dyn SearchScope) {
        self.up_to_date.lock().push(key_type.to_string());
    }

    fn schedule_full_reindex(&self) {
        self.full_reindexes.fetch_add(1, Ordering::SeqCst);
    }
}

/// The three fakes wired together.
#[derive(Debug, Default, Clone)]
pub struct FakeHost {
    /// File registry.
    pub files: Arc<MemoryFileRegistry>,
    /// Parser.
    pub parser: Arc<FakeParser>,
    /// Scheduler.
    pub scheduler: Arc<RecordingScheduler>,
}

impl FakeHost {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collaborators to hand to a registry.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            Arc::clone(&self.parser) as Arc<dyn StructuralParser>,
            Arc::clone(&self.files) as Arc<dyn FileRegistry>,
            Arc::clone(&self.scheduler) as Arc<dyn IndexingScheduler>,
        )
    }

    /// Registers a file with the given entries and returns its id.
    pub fn add_file(&self, id: u32, entries: &[(EntryTag, &str)]) -> FileId {
        let handle = self.files.add(id, format!("src/file_{id}.rs"));
        self.parser.set_tree(handle.id, tree_of(entries));
        handle.id
    }
}

/// Builds a tree whose entries are spaced 16 bytes apart.
pub fn tree_of(entries: &[(EntryTag, &str)]) -> StructuralTree {
    entries
        .iter()
        .zip(0u32..)
        .map(|((tag, name), i)| StructuralEntry::new(*tag, *name, i * 16))
        .collect()
}
