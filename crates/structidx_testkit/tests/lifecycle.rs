//! Integration tests for registry startup, rebuilds and on-disk recovery.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use structidx_core::{
    CoreError, ExecutionMode, FailureKind, FileId, GlobalScope, IndexConfig, IndexRegistry,
    KeyType, RebuildCause, RebuildState, ValueList, VersionMarker,
};
use structidx_testkit::prelude::*;

fn no_old_keys() -> HashSet<String> {
    HashSet::new()
}

fn read_marker(root: &Path, name: &str) -> Vec<u8> {
    fs::read(root.join(name).join("VERSION")).expect("marker exists")
}

#[test]
fn fresh_start_flags_every_key_type() {
    let functions = functions_key_type(1);
    let classes = classes_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration(), classes.declaration()]);

    assert_eq!(
        fixture.invalidated_key_types(),
        &["classes".to_string(), "functions".to_string()]
    );
    assert!(fixture.rebuild_needed());
    assert_eq!(fixture.rebuild_controller().state(), RebuildState::RebuildRequested);
    assert_eq!(fixture.rebuild_controller().rebuild_count(), 0);
    assert_eq!(fixture.host.scheduler.full_reindexes(), 0);

    assert!(fixture.process_pending_rebuild());
    assert!(!fixture.rebuild_needed());
    assert_eq!(fixture.host.scheduler.full_reindexes(), 1);
    assert!(!fixture.process_pending_rebuild());
}

#[test]
fn production_start_rebuilds_immediately() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::production(vec![functions.declaration()]);

    assert_eq!(fixture.rebuild_controller().rebuild_count(), 1);
    assert_eq!(fixture.rebuild_controller().state(), RebuildState::Normal);
    assert_eq!(fixture.host.scheduler.full_reindexes(), 1);
    assert!(matches!(
        fixture.rebuild_controller().last_cause(),
        Some(RebuildCause::VersionMismatch { .. })
    ));
}

#[test]
fn data_survives_reopen_with_same_version() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(
        &functions,
        FileId::new(1),
        entries(&[("main", &[0]), ("helper", &[1, 2])]),
        no_old_keys,
    ));

    let fixture = fixture.reopen(vec![functions.declaration()]);
    assert!(fixture.invalidated_key_types().is_empty());
    assert!(!fixture.rebuild_needed());
    assert_eq!(
        fixture.get_all_keys(&functions),
        vec!["helper".to_string(), "main".to_string()]
    );

    let instance = fixture.index(&functions).unwrap();
    let stored = instance.get(&"helper".to_string());
    assert_eq!(stored.get(FileId::new(1)), Some(&ValueList::from(vec![1, 2])));
}

#[test]
fn version_bump_discards_data() {
    let v1 = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![v1.declaration()]);
    assert!(fixture.update(&v1, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));

    let v2 = functions_key_type(2);
    let fixture = fixture.reopen(vec![v2.declaration()]);

    assert_eq!(fixture.invalidated_key_types(), &["functions".to_string()]);
    assert!(fixture.get_all_keys(&v2).is_empty());
    assert!(fixture.rebuild_needed());
    assert!(matches!(
        fixture.rebuild_controller().pending_cause(),
        Some(RebuildCause::VersionMismatch { ref key_types }) if key_types == &["functions".to_string()]
    ));

    let marker = VersionMarker::decode(&read_marker(fixture.root(), "functions")).unwrap();
    assert_eq!(marker.version, 2);
}

#[test]
fn version_bump_in_production_schedules_reindex() {
    let v1 = functions_key_type(1);
    let fixture = TestRegistry::production(vec![v1.declaration()]);
    assert!(fixture.update(&v1, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));
    fixture.host.scheduler.reset();

    let v2 = functions_key_type(2);
    let fixture = fixture.reopen(vec![v2.declaration()]);

    assert!(fixture.get_all_keys(&v2).is_empty());
    assert!(!fixture.rebuild_needed());
    assert_eq!(fixture.host.scheduler.full_reindexes(), 1);
}

#[test]
fn only_the_bumped_key_type_is_discarded() {
    let functions = functions_key_type(1);
    let classes = classes_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration(), classes.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));
    assert!(fixture.update(&classes, FileId::new(1), entries(&[("Widget", &[1])]), no_old_keys));

    let classes_v2 = classes_key_type(2);
    let fixture = fixture.reopen(vec![functions.declaration(), classes_v2.declaration()]);

    assert_eq!(fixture.invalidated_key_types(), &["classes".to_string()]);
    assert_eq!(fixture.get_all_keys(&functions), vec!["main".to_string()]);
    assert!(fixture.get_all_keys(&classes_v2).is_empty());
}

#[test]
fn force_clean_discards_everything() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));

    let config = fixture.config().clone().force_clean(true);
    let fixture = fixture.reopen_with(config, vec![functions.declaration()]);

    assert_eq!(fixture.invalidated_key_types(), &["functions".to_string()]);
    assert!(fixture.get_all_keys(&functions).is_empty());
}

#[test]
fn undeclared_key_types_are_removed() {
    let functions = functions_key_type(1);
    let classes = classes_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration(), classes.declaration()]);
    assert!(fixture.update(&classes, FileId::new(1), entries(&[("Widget", &[1])]), no_old_keys));
    assert!(fixture.root().join("classes").exists());

    let fixture = fixture.reopen(vec![functions.declaration()]);

    assert!(!fixture.root().join("classes").exists());
    assert!(fixture.root().join("functions").exists());
    assert_eq!(fixture.all_key_types(), vec!["functions".to_string()]);
    assert!(fixture.index(&classes).is_none());
}

#[test]
fn undeclared_key_types_are_removed_without_a_manifest() {
    let functions = functions_key_type(1);
    let classes = classes_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration(), classes.declaration()]);
    assert!(fixture.update(&classes, FileId::new(1), entries(&[("Widget", &[1])]), no_old_keys));

    let config = fixture.config().clone();
    let fixture = fixture.reopen_after(config, vec![functions.declaration()], |root| {
        fs::write(root.join("KEYTYPES"), b"garbage").unwrap();
        fs::create_dir_all(root.join("scratch")).unwrap();
    });

    assert!(!fixture.root().join("classes").exists());
    assert!(fixture.root().join("functions").exists());
    // Directories without a version marker are not ours to delete.
    assert!(fixture.root().join("scratch").exists());

    let config = fixture.config().clone();
    let fixture = fixture.reopen_with(config, vec![functions.declaration()]);
    assert!(fixture.invalidated_key_types().is_empty());
}

#[test]
fn second_registry_on_same_root_is_locked_out() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);

    let other = functions_key_type(1);
    let result = IndexRegistry::initialize(
        IndexConfig::new(fixture.root()).execution_mode(ExecutionMode::Deterministic),
        fixture.host.collaborators(),
        vec![other.declaration()],
    );
    assert!(matches!(result, Err(CoreError::IndexLocked)));
}

#[test]
fn invalid_names_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let host = FakeHost::new();

    for bad in ["", ".hidden", "a/b", "LOCK", "keytypes"] {
        let kt = KeyType::<String>::new(bad, 1);
        let result = IndexRegistry::initialize(
            IndexConfig::new(temp.path()),
            host.collaborators(),
            vec![kt.declaration()],
        );
        assert!(
            matches!(result, Err(CoreError::InvalidKeyType { .. })),
            "{bad:?} should be rejected"
        );
    }

    let a = KeyType::<String>::new("Names", 1);
    let b = KeyType::<String>::new("names", 1);
    let result = IndexRegistry::initialize(
        IndexConfig::new(temp.path()),
        host.collaborators(),
        vec![a.declaration(), b.declaration()],
    );
    assert!(matches!(result, Err(CoreError::InvalidKeyType { .. })));
}

#[test]
fn repeated_rebuilds_leave_markers_untouched() {
    let functions = functions_key_type(1);
    let classes = classes_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration(), classes.declaration()]);
    assert!(fixture.process_pending_rebuild());

    let functions_marker = read_marker(fixture.root(), "functions");
    let classes_marker = read_marker(fixture.root(), "classes");

    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));
    fixture.rebuild_controller().force_rebuild(RebuildCause::Requested);
    fixture.rebuild_controller().force_rebuild(RebuildCause::Requested);

    assert!(fixture.get_all_keys(&functions).is_empty());
    assert_eq!(read_marker(fixture.root(), "functions"), functions_marker);
    assert_eq!(read_marker(fixture.root(), "classes"), classes_marker);
    assert_eq!(fixture.rebuild_controller().rebuild_count(), 3);
    assert_eq!(fixture.host.scheduler.full_reindexes(), 3);
    assert_eq!(fixture.index(&functions).unwrap().stats().rebuild_wipes, 3);
}

#[test]
fn rebuild_restores_a_missing_marker() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    fs::remove_file(fixture.root().join("functions").join("VERSION")).unwrap();

    fixture.rebuild_controller().force_rebuild(RebuildCause::Requested);

    let dir_marker = VersionMarker::decode(&read_marker(fixture.root(), "functions")).unwrap();
    assert_eq!(dir_marker.version, 1);
}

#[test]
fn rebuilt_index_accepts_new_data() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));

    fixture.rebuild_controller().force_rebuild(RebuildCause::Requested);
    assert!(fixture.update(&functions, FileId::new(2), entries(&[("run", &[3])]), no_old_keys));

    let fixture = fixture.reopen(vec![functions.declaration()]);
    assert_eq!(fixture.get_all_keys(&functions), vec!["run".to_string()]);
}

#[test]
fn corrupted_record_at_runtime_forces_rebuild() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.process_pending_rebuild());
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));
    fixture.flush_all();
    fixture.host.scheduler.reset();

    // Flip the last checksum byte of the only record.
    let path = fixture.root().join("functions").join("storage.dat");
    let len = fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    let mut last = [0u8; 1];
    file.read_exact(&mut last).unwrap();
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    file.write_all(&[last[0] ^ 0xFF]).unwrap();
    file.sync_all().unwrap();

    let instance = fixture.index(&functions).unwrap();
    assert!(instance.get(&"main".to_string()).is_empty());

    let controller = fixture.rebuild_controller();
    assert_eq!(controller.rebuild_count(), 2);
    let cause = controller.last_cause().unwrap();
    assert_eq!(cause.kind(), Some(FailureKind::StorageCorruption));
    assert!(matches!(cause, RebuildCause::StorageFailure { ref key_type, .. } if key_type == "functions"));
    assert_eq!(instance.stats().storage_failures, 1);
    assert_eq!(fixture.host.scheduler.full_reindexes(), 1);
    assert!(fixture.get_all_keys(&functions).is_empty());
}

#[test]
fn corrupted_log_on_open_is_recreated() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("alpha", &[0])]), no_old_keys));
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("beta", &[1])]), no_old_keys));

    // Damage the key of the first of two records.
    let config = fixture.config().clone();
    let fixture = fixture.reopen_after(config, vec![functions.declaration()], |root| {
        let path = root.join("functions").join("storage.dat");
        let mut bytes = fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
    });

    assert_eq!(fixture.invalidated_key_types(), &["functions".to_string()]);
    assert!(fixture.get_all_keys(&functions).is_empty());
    assert!(fixture.index(&functions).unwrap().is_durable());
    assert!(matches!(
        fixture.rebuild_controller().pending_cause(),
        Some(RebuildCause::StorageFailure { ref key_type, .. }) if key_type == "functions"
    ));

    let marker = VersionMarker::decode(&read_marker(fixture.root(), "functions")).unwrap();
    assert_eq!(marker.version, 1);

    assert!(fixture.update(&functions, FileId::new(2), entries(&[("gamma", &[2])]), no_old_keys));
    assert_eq!(fixture.get_all_keys(&functions), vec!["gamma".to_string()]);
}

#[test]
fn torn_tail_keeps_earlier_records() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("alpha", &[0])]), no_old_keys));
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("beta", &[1])]), no_old_keys));

    let config = fixture.config().clone();
    let fixture = fixture.reopen_after(config, vec![functions.declaration()], |root| {
        let path = root.join("functions").join("storage.dat");
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        fs::write(&path, bytes).unwrap();
    });

    assert!(fixture.invalidated_key_types().is_empty());
    assert!(!fixture.rebuild_needed());
    assert_eq!(fixture.get_all_keys(&functions), vec!["alpha".to_string()]);
}

#[test]
fn unreadable_marker_counts_as_mismatch() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));

    let config = fixture.config().clone();
    let fixture = fixture.reopen_after(config, vec![functions.declaration()], |root| {
        fs::write(root.join("functions").join("VERSION"), b"garbage").unwrap();
    });

    assert_eq!(fixture.invalidated_key_types(), &["functions".to_string()]);
    assert!(fixture.get_all_keys(&functions).is_empty());
}

/// Replaces the key type's directory with a plain file so that neither the
/// first open nor the recreate can succeed.
fn block_key_type_dir(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::remove_dir_all(&dir).unwrap();
    fs::write(&dir, b"not a directory").unwrap();
}

#[test]
fn unrecoverable_storage_falls_back_to_memory() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.process_pending_rebuild());

    let config = fixture.config().clone();
    let fixture = fixture.reopen_after(config, vec![functions.declaration()], |root| {
        block_key_type_dir(root, "functions");
    });

    assert_eq!(fixture.invalidated_key_types(), &["functions".to_string()]);
    assert!(fixture.rebuild_needed());
    let instance = fixture.index(&functions).unwrap();
    assert!(!instance.is_durable());

    // Served from memory until the rebuild runs.
    fixture.host.add_file(1, &[(FUNCTION_TAG, "main")]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));
    assert_eq!(
        fixture.get(&functions, &"main".to_string(), &GlobalScope).len(),
        1
    );

    assert!(fixture.process_pending_rebuild());
    assert!(fixture.get_all_keys(&functions).is_empty());
    assert!(!instance.is_durable());
    assert_eq!(fixture.rebuild_controller().state(), RebuildState::Normal);
}

#[test]
fn memory_fallback_returns_to_disk_on_rebuild() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.process_pending_rebuild());

    let config = fixture.config().clone();
    let fixture = fixture.reopen_after(config, vec![functions.declaration()], |root| {
        block_key_type_dir(root, "functions");
    });
    let instance = fixture.index(&functions).unwrap();
    assert!(!instance.is_durable());

    fs::remove_file(fixture.root().join("functions")).unwrap();
    assert!(fixture.process_pending_rebuild());

    assert!(instance.is_durable());
    let marker = VersionMarker::decode(&read_marker(fixture.root(), "functions")).unwrap();
    assert_eq!(marker.version, 1);

    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));
    let config = fixture.config().clone();
    let fixture = fixture.reopen_with(config, vec![functions.declaration()]);
    assert!(fixture.invalidated_key_types().is_empty());
    assert_eq!(fixture.get_all_keys(&functions), vec!["main".to_string()]);
}

#[test]
fn disposed_registry_serves_nothing() {
    let functions = functions_key_type(1);
    let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
    assert!(fixture.update(&functions, FileId::new(1), entries(&[("main", &[0])]), no_old_keys));

    fixture.dispose();
    fixture.dispose();

    assert!(fixture.is_disposed());
    assert!(fixture.get_all_keys(&functions).is_empty());
    assert!(!fixture.update(&functions, FileId::new(2), entries(&[("run", &[0])]), no_old_keys));
}
