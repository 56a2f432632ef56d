//! Cache Construction Benchmark
//!
//! Measures the cost of re-keying: the Argon2d fill plus generation of the
//! mixing-program chain. Uses the smallest production parameter set so a
//! run finishes in reasonable time.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use quasar::{Cache, Variant};

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_cache_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cache Build");
    group.sample_size(10);

    let cfg = Variant::Arqma.configuration();
    let mut key = 0_u64;
    group.bench_function("Arqma (128 MiB fill)", |b| {
        b.iter(|| {
            key += 1;
            Cache::new(&cfg, black_box(&key.to_le_bytes())).unwrap()
        });
    });
    group.finish();
}

fn bench_dataset_items(c: &mut Criterion) {
    let mut group = c.benchmark_group("Dataset Expansion");
    group.sample_size(10);

    let cfg = Variant::Arqma.configuration();
    let cache = Cache::new(&cfg, b"bench dataset key").unwrap();
    let mut out = vec![0_u8; 1024 * 64];
    group.throughput(criterion::Throughput::Bytes(out.len() as u64));
    group.bench_function("1024 items", |b| {
        b.iter(|| quasar::initialize_items(&cache, 0, 1024, black_box(&mut out)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_cache_build, bench_dataset_items);
criterion_main!(benches);
