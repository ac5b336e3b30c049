//! End-to-end index benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashSet;
use structidx_bench::{generate_keys, random_file_entries, uniform_tree};
use structidx_core::{FileId, GlobalScope};
use structidx_testkit::{functions_key_type, TestRegistry, FUNCTION_TAG};

const TREE_LEN: u32 = 256;

/// Benchmark updating one file's contribution.
fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    let keys = generate_keys(4096);

    for per_file in [8usize, 64].iter() {
        group.throughput(Throughput::Elements(*per_file as u64));
        group.bench_with_input(BenchmarkId::from_parameter(per_file), per_file, |b, &per_file| {
            let functions = functions_key_type(1);
            let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
            let mut file = 0u32;
            let mut previous: Vec<HashSet<String>> = vec![HashSet::new(); 64];
            b.iter(|| {
                let entries = random_file_entries(&keys, per_file, TREE_LEN);
                let slot = (file % 64) as usize;
                let old = std::mem::replace(&mut previous[slot], entries.keys().cloned().collect());
                fixture.update(&functions, FileId::new(file % 64), entries, || old);
                file = file.wrapping_add(1);
            });
        });
    }

    group.finish();
}

/// Benchmark a reconciled lookup by number of matching files.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for files in [1u32, 32, 256].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(files), files, |b, &files| {
            let functions = functions_key_type(1);
            let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
            fixture.process_pending_rebuild();
            let key = "entry".to_string();
            for id in 0..files {
                let handle = fixture.host.files.add(id, format!("src/{id}.rs"));
                fixture
                    .host
                    .parser
                    .set_tree(handle.id, uniform_tree(TREE_LEN, FUNCTION_TAG));
                let entries = [(key.clone(), structidx_core::ValueList::singleton(id % TREE_LEN))]
                    .into_iter()
                    .collect();
                fixture.update(&functions, handle.id, entries, HashSet::new);
            }

            b.iter(|| {
                let found = fixture.get(&functions, black_box(&key), &GlobalScope);
                black_box(found);
            });
        });
    }

    group.finish();
}

/// Benchmark listing every key.
fn bench_all_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("all_keys");
    let keys = generate_keys(8192);

    group.bench_function("8192", |b| {
        let functions = functions_key_type(1);
        let fixture = TestRegistry::deterministic(vec![functions.declaration()]);
        for (id, chunk) in keys.chunks(64).enumerate() {
            let entries = chunk
                .iter()
                .map(|key| (key.clone(), structidx_core::ValueList::singleton(0)))
                .collect();
            fixture.update(&functions, FileId::new(id as u32), entries, HashSet::new);
        }

        b.iter(|| {
            black_box(fixture.get_all_keys(&functions));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_update, bench_get, bench_all_keys);

criterion_main!(benches);
