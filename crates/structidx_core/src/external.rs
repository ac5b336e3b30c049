//! Boundary with the collaborators the index consumes.
//!
//! The index does not parse files, assign file ids, or decide when to
//! index. Those services are supplied by the host through the traits in
//! this module.

use crate::error::CoreResult;
use crate::types::{EntryTag, FileId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A resolved source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle {
    /// Stable file id.
    pub id: FileId,
    /// Location of the file.
    pub path: PathBuf,
}

impl FileHandle {
    /// Creates a handle.
    pub fn new(id: FileId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}

/// One entry of a structural tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralEntry {
    /// Kind of declaration.
    pub tag: EntryTag,
    /// Declared name.
    pub name: String,
    /// Byte offset of the declaration in the file.
    pub offset: u32,
}

impl StructuralEntry {
    /// Creates an entry.
    pub fn new(tag: EntryTag, name: impl Into<String>, offset: u32) -> Self {
        Self {
            tag,
            name: name.into(),
            offset,
        }
    }
}

/// Flat ordered list of a file's structural entries.
///
/// Positions stored in the index are indexes into this list. Trees are
/// immutable once produced and shared through `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralTree {
    entries: Vec<StructuralEntry>,
}

impl StructuralTree {
    /// Creates a tree from its entries.
    #[must_use]
    pub fn new(entries: Vec<StructuralEntry>) -> Self {
        Self { entries }
    }

    /// Returns the entry at `position`.
    #[must_use]
    pub fn get(&self, position: u32) -> Option<&StructuralEntry> {
        self.entries.get(position as usize)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entries in order.
    #[must_use]
    pub fn entries(&self) -> &[StructuralEntry] {
        &self.entries
    }
}

impl FromIterator<StructuralEntry> for StructuralTree {
    fn from_iter<I: IntoIterator<Item = StructuralEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Produces structural trees for files.
///
/// Both methods block until the tree is available and fail with
/// [`CoreError::ResourceUnavailable`](crate::CoreError::ResourceUnavailable)
/// when the file cannot be read or parsed.
pub trait StructuralParser: Send + Sync {
    /// Returns the cached tree for `file`, parsing it if none is cached.
    /// The cached tree may be stale.
    fn parse_or_get_cached_tree(&self, file: &FileHandle) -> CoreResult<Arc<StructuralTree>>;

    /// Parses `file` from its current contents.
    fn rebuild_tree(&self, file: &FileHandle) -> CoreResult<Arc<StructuralTree>>;
}

/// Maps file ids to files.
pub trait FileRegistry: Send + Sync {
    /// Resolves `id`, or `None` if the file is gone.
    fn resolve(&self, id: FileId) -> Option<FileHandle>;
}

/// Decides when files are (re)indexed.
pub trait IndexingScheduler: Send + Sync {
    /// Asks for `file` to be reindexed.
    fn enqueue_reindex(&self, file: &FileHandle);

    /// Brings pending updates for `key_type` within `scope` up to date
    /// before a query runs.
    fn ensure_up_to_date(&self, key_type: &str, scope: &dyn SearchScope);

    /// Called after a rebuild wiped all key types.
    fn schedule_full_reindex(&self) {}
}

/// Restricts queries to a set of files.
pub trait SearchScope: Send + Sync {
    /// Returns true if results from `file` may be returned.
    fn contains(&self, file: &FileHandle) -> bool;
}

impl<F> SearchScope for F
where
    F: Fn(&FileHandle) -> bool + Send + Sync,
{
    fn contains(&self, file: &FileHandle) -> bool {
        self(file)
    }
}

/// Scope containing every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalScope;

impl SearchScope for GlobalScope {
    fn contains(&self, _file: &FileHandle) -> bool {
        true
    }
}

/// Scope containing an explicit set of files.
#[derive(Debug, Clone, Default)]
pub struct FileSetScope {
    files: HashSet<FileId>,
}

impl FileSetScope {
    /// Creates a scope over `files`.
    pub fn new(files: impl IntoIterator<Item = FileId>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

impl SearchScope for FileSetScope {
    fn contains(&self, file: &FileHandle) -> bool {
        self.files.contains(&file.id)
    }
}

/// Cooperative cancellation flag shared between a query and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every scan observing this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The indexing services the registry works with.
#[derive(Clone)]
pub struct Collaborators {
    /// Structural parser.
    pub parser: Arc<dyn StructuralParser>,
    /// File registry.
    pub files: Arc<dyn FileRegistry>,
    /// Indexing scheduler.
    pub scheduler: Arc<dyn IndexingScheduler>,
}

impl Collaborators {
    /// Bundles the collaborators.
    pub fn new(
        parser: Arc<dyn StructuralParser>,
        files: Arc<dyn FileRegistry>,
        scheduler: Arc<dyn IndexingScheduler>,
    ) -> Self {
        Self {
            parser,
            files,
            scheduler,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
