//! Benchmark utilities.

use rand::Rng;
use std::collections::HashMap;
use structidx_core::{EntryTag, StructuralTree, ValueList};
use structidx_testkit::tree_of;

/// Generate a value list of `len` random positions below `bound`.
pub fn random_list(len: usize, bound: u32) -> ValueList {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(0..bound)).collect()
}

/// Generate `count` identifier-like keys.
pub fn generate_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("symbol_{i:06}")).collect()
}

/// Generate the entries one file contributes: `per_file` random keys out
/// of `keys`, each at a random position below `tree_len`.
pub fn random_file_entries(
    keys: &[String],
    per_file: usize,
    tree_len: u32,
) -> HashMap<String, ValueList> {
    let mut rng = rand::thread_rng();
    (0..per_file)
        .map(|_| {
            let key = keys[rng.gen_range(0..keys.len())].clone();
            (key, ValueList::singleton(rng.gen_range(0..tree_len)))
        })
        .collect()
}

/// Generate a tree of `len` entries all tagged `tag`.
pub fn uniform_tree(len: u32, tag: EntryTag) -> StructuralTree {
    let names: Vec<String> = (0..len).map(|i| format!("entry_{i}")).collect();
    let entries: Vec<(EntryTag, &str)> = names.iter().map(|n| (tag, n.as_str())).collect();
    tree_of(&entries)
}
