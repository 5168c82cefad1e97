//! Micro-benchmarks for the core engine operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use lsmdb::engine::{Engine, EngineConfig};
use tempfile::TempDir;

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Opens a fresh engine with a small write buffer so rollovers happen
/// often during sustained-write benchmarks.
fn open_small_buffer(dir: &std::path::Path) -> Engine {
    Engine::open(
        dir,
        EngineConfig {
            write_buffer_size: 4 * 1024,
            ..EngineConfig::default()
        },
    )
    .expect("open")
}

/// Opens an engine with a large write buffer so all data stays in the
/// memtable for the duration of the benchmark (no rollovers).
fn open_memtable_only(dir: &std::path::Path) -> Engine {
    Engine::open(
        dir,
        EngineConfig {
            write_buffer_size: 64 * 1024 * 1024,
            ..EngineConfig::default()
        },
    )
    .expect("open")
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("memtable_only_128b", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let mut i = 0u64;
        b.iter(|| {
            engine.set(&make_key(i), VALUE_128B).unwrap();
            i += 1;
        });
    });

    group.bench_function("with_rollover_128b", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        let mut i = 0u64;
        b.iter(|| {
            engine.set(&make_key(i), VALUE_128B).unwrap();
            i += 1;
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("memtable_hit", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        for i in 0..10_000u64 {
            engine.set(&make_key(i), VALUE_128B).unwrap();
        }
        b.iter_batched(
            || make_key(fastrand_index(10_000)),
            |key| black_box(engine.get(&key).unwrap()),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("sstable_hit", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        for i in 0..10_000u64 {
            engine.set(&make_key(i), VALUE_128B).unwrap();
        }
        b.iter_batched(
            || make_key(fastrand_index(10_000)),
            |key| black_box(engine.get(&key).unwrap()),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("miss", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        for i in 0..10_000u64 {
            engine.set(&make_key(i), VALUE_128B).unwrap();
        }
        b.iter(|| black_box(engine.get(b"not-a-real-key").unwrap()));
    });

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");
    group.bench_function("memtable_only", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_memtable_only(dir.path());
        let mut i = 0u64;
        b.iter_batched(
            || {
                let key = make_key(i);
                i += 1;
                engine.set(&key, VALUE_128B).unwrap();
                key
            },
            |key| engine.delete(&key).unwrap(),
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_value_size_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_value_size");
    for (label, value) in [("128b", &VALUE_128B[..]), ("1k", &VALUE_1K[..])] {
        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), value, |b, value| {
            let dir = TempDir::new().unwrap();
            let engine = open_memtable_only(dir.path());
            let mut i = 0u64;
            b.iter(|| {
                engine.set(&make_key(i), value).unwrap();
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_reopen(c: &mut Criterion) {
    c.bench_function("reopen_after_rollovers", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                {
                    let engine = open_small_buffer(dir.path());
                    for i in 0..5_000u64 {
                        engine.set(&make_key(i), VALUE_128B).unwrap();
                    }
                    engine.close().unwrap();
                }
                dir
            },
            |dir| {
                let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
                black_box(engine.key_count());
            },
            BatchSize::LargeInput,
        );
    });
}

/// A cheap, deterministic-enough index generator so benches don't pull
/// in a runtime RNG dependency just for sampling an existing key.
fn fastrand_index(bound: u64) -> u64 {
    use std::cell::Cell;
    thread_local! {
        static STATE: Cell<u64> = const { Cell::new(0x2545F4914F6CDD1D) };
    }
    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x % bound
    })
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_delete,
    bench_value_size_scaling,
    bench_reopen
);
criterion_main!(benches);
