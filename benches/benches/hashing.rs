//! Hashing Throughput Benchmark
//!
//! Compares the interpreted and precompiled execution backends and the
//! pipelined hashing path on a shared light-mode cache.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use quasar::{Cache, Flags, Variant, Vm};

// Typical block header size.
const INPUT_SIZE: usize = 76;

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_backends(c: &mut Criterion) {
    let cache = Arc::new(Cache::new(&Variant::Arqma.configuration(), b"bench key").unwrap());
    let mut input = [0_u8; INPUT_SIZE];
    rand::rng().fill(&mut input[..]);

    let mut group = c.benchmark_group("Light Hashing");
    group.sample_size(10);

    let mut soft = Vm::light(Arc::clone(&cache), Flags::empty()).unwrap();
    group.bench_function("interpreted", |b| {
        b.iter(|| soft.hash(black_box(&input)).unwrap());
    });

    let mut fast = Vm::light(Arc::clone(&cache), Flags::PRECOMPILED).unwrap();
    group.bench_function("precompiled", |b| {
        b.iter(|| fast.hash(black_box(&input)).unwrap());
    });

    let mut pipelined = Vm::light(Arc::clone(&cache), Flags::PRECOMPILED).unwrap();
    pipelined.hash_first(&input).unwrap();
    group.bench_function("precompiled pipelined", |b| {
        b.iter(|| pipelined.hash_next(black_box(&input)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_backends);
criterion_main!(benches);
