//! Reconciliation of stored positions against live structure.
//!
//! A stored value says "file F has matching entries at positions P". Files
//! change between indexing runs, so before anything is returned each
//! position is checked against the file's current structural tree:
//!
//! - in bounds with the expected tag: yielded
//! - in bounds with another tag: skipped, the file is enqueued for
//!   reindexing
//! - out of bounds: skipped, the file is enqueued, and the rebuild
//!   controller is told the index drifted
//!
//! A file is enqueued at most once per scan, and nothing from a file is
//! yielded before all of its positions were checked.

use crate::external::{
    CancellationToken, FileHandle, FileRegistry, IndexingScheduler, SearchScope,
    StructuralEntry, StructuralParser, StructuralTree,
};
use crate::rebuild::{RebuildCause, RebuildController};
use crate::storage::FileMap;
use crate::types::{EntryTag, FileId};
use std::sync::Arc;
use structidx_codec::{IndexValue, ValueList};

/// A value that names positions in a structural tree.
pub trait StructuralPositions {
    /// Returns the stored positions.
    fn positions(&self) -> &[u32];
}

impl StructuralPositions for ValueList {
    fn positions(&self) -> &[u32] {
        self.as_slice()
    }
}

/// A live query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// File containing the entry.
    pub file: FileHandle,
    /// Position of the entry in the file's structural tree.
    pub position: u32,
    /// The entry as currently parsed.
    pub entry: StructuralEntry,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every file was visited.
    Completed,
    /// The processor asked to stop.
    Stopped,
    /// The cancellation token fired.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionCheck {
    Valid,
    TagMismatch,
    OutOfBounds,
}

/// Validates raw hits for one query.
pub struct Reconciler<'a> {
    files: &'a dyn FileRegistry,
    parser: &'a dyn StructuralParser,
    scheduler: &'a dyn IndexingScheduler,
    controller: &'a RebuildController,
    key_type: &'a str,
    entry_tag: Option<EntryTag>,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler for one key type.
    pub fn new(
        files: &'a dyn FileRegistry,
        parser: &'a dyn StructuralParser,
        scheduler: &'a dyn IndexingScheduler,
        controller: &'a RebuildController,
        key_type: &'a str,
        entry_tag: Option<EntryTag>,
    ) -> Self {
        Self {
            files,
            parser,
            scheduler,
            controller,
            key_type,
            entry_tag,
        }
    }

    /// Feeds every live entry of `hits` within `scope` to `processor`,
    /// in ascending file id order.
    ///
    /// The processor returns false to stop the scan. Cancellation is
    /// checked before each file.
    pub fn scan<V, P>(
        &self,
        hits: &FileMap<V>,
        scope: &dyn SearchScope,
        cancel: Option<&CancellationToken>,
        mut processor: P,
    ) -> ScanOutcome
    where
        V: IndexValue + StructuralPositions,
        P: FnMut(Descriptor) -> bool,
    {
        let mut drifted: Option<FileId> = None;
        let mut outcome = ScanOutcome::Completed;

        for (file_id, value) in hits.iter() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return ScanOutcome::Cancelled;
            }

            let Some((file, tree, checks)) = self.validate_file(file_id, value, scope) else {
                continue;
            };

            if checks.iter().any(|(_, check)| *check != PositionCheck::Valid) {
                self.scheduler.enqueue_reindex(&file);
            }
            if checks.iter().any(|(_, check)| *check == PositionCheck::OutOfBounds) {
                drifted.get_or_insert(file_id);
            }

            let mut stopped = false;
            for (position, check) in checks {
                if check != PositionCheck::Valid {
                    continue;
                }
                let Some(entry) = tree.get(position) else {
                    continue;
                };
                let descriptor = Descriptor {
                    file: file.clone(),
                    position,
                    entry: entry.clone(),
                };
                if !processor(descriptor) {
                    stopped = true;
                    break;
                }
            }
            if stopped {
                outcome = ScanOutcome::Stopped;
                break;
            }
        }

        if let Some(file_id) = drifted {
            self.controller
                .request_rebuild(RebuildCause::ReconciliationDrift { file_id });
        }
        outcome
    }

    fn validate_file<V>(
        &self,
        file_id: FileId,
        value: &V,
        scope: &dyn SearchScope,
    ) -> Option<(FileHandle, Arc<StructuralTree>, Vec<(u32, PositionCheck)>)>
    where
        V: StructuralPositions,
    {
        let Some(file) = self.files.resolve(file_id) else {
            tracing::debug!(key_type = self.key_type, file_id = %file_id, "skipping unresolvable file");
            return None;
        };
        if !scope.contains(&file) {
            return None;
        }

        let cached = match self.parser.parse_or_get_cached_tree(&file) {
            Ok(tree) => tree,
            Err(err) => {
                tracing::debug!(key_type = self.key_type, file_id = %file_id, error = %err, "structure unavailable, skipping file");
                return None;
            }
        };

        let positions = value.positions();
        let checks = self.check_positions(&cached, positions);
        if checks.iter().all(|(_, check)| *check == PositionCheck::Valid) {
            return Some((file, cached, checks));
        }

        // The cached tree may be stale; decide against a fresh parse.
        let fresh = match self.parser.rebuild_tree(&file) {
            Ok(tree) => tree,
            Err(err) => {
                tracing::debug!(key_type = self.key_type, file_id = %file_id, error = %err, "structure unavailable, skipping file");
                return None;
            }
        };
        let checks = self.check_positions(&fresh, positions);
        let mut mismatch_reported = false;
        for (position, check) in &checks {
            match check {
                PositionCheck::Valid => {}
                PositionCheck::TagMismatch if mismatch_reported => {}
                PositionCheck::TagMismatch => {
                    mismatch_reported = true;
                    tracing::warn!(
                        key_type = self.key_type,
                        file_id = %file_id,
                        position,
                        "stored entry has a different tag in the live tree"
                    );
                }
                PositionCheck::OutOfBounds => {
                    tracing::error!(
                        key_type = self.key_type,
                        file_id = %file_id,
                        position,
                        tree_len = fresh.len(),
                        "stored position is outside the live tree"
                    );
                }
            }
        }
        Some((file, fresh, checks))
    }

    fn check_positions(&self, tree: &StructuralTree, positions: &[u32]) -> Vec<(u32, PositionCheck)> {
        positions
            .iter()
            .map(|&position| {
                let check = match tree.get(position) {
                    None => PositionCheck::OutOfBounds,
                    Some(entry) if self.entry_tag.is_some_and(|tag| tag != entry.tag) => {
                        PositionCheck::TagMismatch
                    }
                    Some(_) => PositionCheck::Valid,
                };
                (position, check)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::error::{CoreError, CoreResult};
    use crate::external::GlobalScope;
    use crate::rebuild::RebuildState;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FUNCTION: EntryTag = EntryTag::new(1);
    const CLASS: EntryTag = EntryTag::new(2);

    #[derive(Default)]
    struct Fixture {
        trees: Mutex<HashMap<FileId, Arc<StructuralTree>>>,
        stale: Mutex<HashMap<FileId, Arc<StructuralTree>>>,
        enqueued: Mutex<Vec<FileId>>,
        rebuild_calls: AtomicUsize,
    }

    impl FileRegistry for Fixture {
        fn resolve(&self, id: FileId) -> Option<FileHandle> {
            self.trees
                .lock()
                .contains_key(&id)
                .then(|| FileHandle::new(id, format!("f{}.rs", id.as_u32())))
        }
    }

    impl StructuralParser for Fixture {
        fn parse_or_get_cached_tree(&self, file: &FileHandle) -> CoreResult<Arc<StructuralTree>> {
            if let Some(tree) = self.stale.lock().get(&file.id) {
                return Ok(Arc::clone(tree));
            }
            self.rebuild_tree(file)
        }

        fn rebuild_tree(&self, file: &FileHandle) -> CoreResult<Arc<StructuralTree>> {
            self.rebuild_calls.fetch_add(1, Ordering::SeqCst);
            self.trees
                .lock()
                .get(&file.id)
                .cloned()
                .ok_or_else(|| CoreError::resource_unavailable("no tree"))
        }
    }

    impl IndexingScheduler for Fixture {
        fn enqueue_reindex(&self, file: &FileHandle) {
            self.enqueued.lock().push(file.id);
        }
        fn ensure_up_to_date(&self, _key_type: &str, _scope: &dyn SearchScope) {}
    }

    fn tree(tags: &[EntryTag]) -> Arc<StructuralTree> {
        Arc::new(
            tags.iter()
                .enumerate()
                .map(|(i, tag)| StructuralEntry::new(*tag, format!("e{i}"), i as u32 * 10))
                .collect(),
        )
    }

    fn hits(entries: &[(u32, &[u32])]) -> FileMap<ValueList> {
        entries
            .iter()
            .map(|(id, p)| (FileId::new(*id), ValueList::from(p.to_vec())))
            .collect()
    }

    fn run(
        fixture: &Fixture,
        controller: &RebuildController,
        hits: &FileMap<ValueList>,
        scope: &dyn SearchScope,
    ) -> (ScanOutcome, Vec<(u32, u32)>) {
        let reconciler = Reconciler::new(fixture, fixture, fixture, controller, "fns", Some(FUNCTION));
        let mut found = Vec::new();
        let outcome = reconciler.scan(hits, scope, None, |d| {
            found.push((d.file.id.as_u32(), d.position));
            true
        });
        (outcome, found)
    }

    fn controller() -> RebuildController {
        struct Quiet;
        impl IndexingScheduler for Quiet {
            fn enqueue_reindex(&self, _file: &FileHandle) {}
            fn ensure_up_to_date(&self, _key_type: &str, _scope: &dyn SearchScope) {}
        }
        RebuildController::new(ExecutionMode::Production, Arc::new(Quiet))
    }

    #[test]
    fn valid_positions_are_yielded_in_file_order() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(2), tree(&[FUNCTION, FUNCTION]));
        fixture.trees.lock().insert(FileId::new(1), tree(&[CLASS, FUNCTION]));
        let controller = controller();

        let (outcome, found) = run(&fixture, &controller, &hits(&[(2, &[0, 1]), (1, &[1])]), &GlobalScope);
        assert_eq!(outcome, ScanOutcome::Completed);
        assert_eq!(found, vec![(1, 1), (2, 0), (2, 1)]);
        assert!(fixture.enqueued.lock().is_empty());
    }

    #[test]
    fn out_of_bounds_is_skipped_enqueued_once_and_reported() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(1), tree(&[FUNCTION]));
        let controller = controller();

        let (_, found) = run(&fixture, &controller, &hits(&[(1, &[0, 5, 9])]), &GlobalScope);
        assert_eq!(found, vec![(1, 0)]);
        assert_eq!(*fixture.enqueued.lock(), vec![FileId::new(1)]);
        assert_eq!(controller.state(), RebuildState::RebuildRequested);
        assert_eq!(
            controller.pending_cause(),
            Some(RebuildCause::ReconciliationDrift {
                file_id: FileId::new(1)
            })
        );
    }

    #[test]
    fn tag_mismatch_is_skipped_without_rebuild() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(1), tree(&[CLASS, CLASS]));
        let controller = controller();

        let (_, found) = run(&fixture, &controller, &hits(&[(1, &[0, 1])]), &GlobalScope);
        assert!(found.is_empty());
        assert_eq!(*fixture.enqueued.lock(), vec![FileId::new(1)]);
        assert_eq!(controller.state(), RebuildState::Normal);
    }

    #[test]
    fn stale_cache_is_reparsed_before_judging() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(1), tree(&[CLASS, FUNCTION, FUNCTION]));
        fixture.stale.lock().insert(FileId::new(1), tree(&[CLASS]));
        let controller = controller();

        let (_, found) = run(&fixture, &controller, &hits(&[(1, &[2])]), &GlobalScope);
        assert_eq!(found, vec![(1, 2)]);
        assert!(fixture.enqueued.lock().is_empty());
        assert_eq!(controller.state(), RebuildState::Normal);
    }

    #[test]
    fn scope_and_unresolvable_files_are_skipped() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(1), tree(&[FUNCTION]));
        fixture.trees.lock().insert(FileId::new(2), tree(&[FUNCTION]));
        let controller = controller();
        let only_two = |file: &FileHandle| file.id == FileId::new(2);

        let (_, found) = run(&fixture, &controller, &hits(&[(1, &[0]), (2, &[0]), (3, &[0])]), &only_two);
        assert_eq!(found, vec![(2, 0)]);
    }

    #[test]
    fn processor_can_stop() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(1), tree(&[FUNCTION, FUNCTION]));
        fixture.trees.lock().insert(FileId::new(2), tree(&[FUNCTION]));
        let controller = controller();
        let reconciler = Reconciler::new(&fixture, &fixture, &fixture, &controller, "fns", Some(FUNCTION));

        let mut seen = 0;
        let outcome = reconciler.scan(&hits(&[(1, &[0, 1]), (2, &[0])]), &GlobalScope, None, |_| {
            seen += 1;
            false
        });
        assert_eq!(outcome, ScanOutcome::Stopped);
        assert_eq!(seen, 1);
    }

    #[test]
    fn cancelled_scan_touches_nothing() {
        let fixture = Fixture::default();
        fixture.trees.lock().insert(FileId::new(1), tree(&[FUNCTION]));
        let controller = controller();
        let reconciler = Reconciler::new(&fixture, &fixture, &fixture, &controller, "fns", Some(FUNCTION));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = reconciler.scan(&hits(&[(1, &[0, 7])]), &GlobalScope, Some(&token), |_| true);
        assert_eq!(outcome, ScanOutcome::Cancelled);
        assert!(fixture.enqueued.lock().is_empty());
        assert_eq!(fixture.rebuild_calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), RebuildState::Normal);
    }
}
