//! Property-based test generators using proptest.

use proptest::prelude::*;
use std::collections::HashMap;
use structidx_core::{FileId, FileMap, ValueList};
use structidx_codec::MAX_POSITION;

/// Strategy for encodable positions, biased towards small values.
pub fn position_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![
        4 => 0u32..64,
        1 => 0u32..=MAX_POSITION,
    ]
}

/// Strategy for value lists. Most lists are empty or singletons, as in
/// real indexes.
pub fn value_list_strategy() -> impl Strategy<Value = ValueList> {
    prop_oneof![
        1 => Just(ValueList::new()),
        4 => position_strategy().prop_map(ValueList::singleton),
        2 => prop::collection::vec(position_strategy(), 2..12).prop_map(ValueList::from),
    ]
}

/// Strategy for file ids.
pub fn file_id_strategy() -> impl Strategy<Value = FileId> {
    (0u32..10_000).prop_map(FileId::new)
}

/// Strategy for the per-file values stored under one key.
pub fn file_map_strategy() -> impl Strategy<Value = FileMap<ValueList>> {
    prop::collection::btree_map(file_id_strategy(), value_list_strategy(), 0..16)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for index keys that look like identifiers.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for valid key type names.
pub fn key_type_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.-]{0,23}")
        .expect("Invalid regex")
        .prop_filter("reserved name", |s| {
            !s.eq_ignore_ascii_case("lock") && !s.eq_ignore_ascii_case("keytypes")
        })
}

/// Strategy for the entries one file contributes in a single update.
pub fn update_entries_strategy() -> impl Strategy<Value = HashMap<String, ValueList>> {
    prop::collection::hash_map(
        key_strategy(),
        prop::collection::vec(0u32..32, 1..4).prop_map(ValueList::from),
        0..8,
    )
}

/// Strategy for a sequence of updates over a handful of files.
pub fn update_batch_strategy(
    files: u32,
    len: usize,
) -> impl Strategy<Value = Vec<(FileId, HashMap<String, ValueList>)>> {
    prop::collection::vec(
        ((0..files).prop_map(FileId::new), update_entries_strategy()),
        0..len,
    )
}
