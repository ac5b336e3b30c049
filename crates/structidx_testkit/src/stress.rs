//! Stress helpers for concurrent index access.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use structidx_core::{FileId, IndexRegistry, KeyType, ValueList};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations. For read stress, these are torn reads.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of write operations.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Number of distinct files written.
    pub file_count: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            file_count: 8,
        }
    }
}

/// Key every stress writer updates.
pub const STRESS_KEY: &str = "shared";

/// The value written for generation `g`. Readers must only ever observe
/// complete pairs.
fn generation_value(generation: u32) -> ValueList {
    ValueList::from(vec![2 * generation, 2 * generation + 1])
}

fn is_whole_pair(value: &ValueList) -> bool {
    matches!(value.as_slice(), [a, b] if a % 2 == 0 && *b == a + 1)
}

/// Runs sequential updates over `config.file_count` files.
pub fn stress_sequential_updates(
    registry: &IndexRegistry,
    key_type: &KeyType<String>,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let generation = i as u32;
        let file = FileId::new(generation % config.file_count.max(1));
        let entries = HashMap::from([(format!("key_{}", i % 64), generation_value(generation))]);
        let previous: HashSet<String> = (0..64).map(|k| format!("key_{k}")).collect();

        if registry.update(key_type, file, entries, || previous) {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Runs one writer against `config.threads` readers of [`STRESS_KEY`].
///
/// Readers go straight to the index instance, bypassing reconciliation.
/// Every read whose value for some file is not a whole generation pair is
/// counted as a failed operation.
pub fn stress_concurrent_reads(
    registry: &IndexRegistry,
    key_type: &KeyType<String>,
    config: &StressConfig,
) -> StressTestResult {
    let Some(instance) = registry.index(key_type) else {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    };

    let done = AtomicBool::new(false);
    let reads = AtomicUsize::new(0);
    let torn = AtomicUsize::new(0);
    let key = STRESS_KEY.to_string();
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let hits = instance.get(&key);
                    if hits.iter().all(|(_, value)| is_whole_pair(value)) {
                        reads.fetch_add(1, Ordering::Relaxed);
                    } else {
                        torn.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        let old = HashSet::from([key.clone()]);
        for i in 0..config.operations {
            let file = FileId::new(i as u32 % config.file_count.max(1));
            let entries = HashMap::from([(key.clone(), generation_value(i as u32))]);
            let old = old.clone();
            instance.update_with_map(file, entries, || old);
        }
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        reads.load(Ordering::Relaxed),
        torn.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
