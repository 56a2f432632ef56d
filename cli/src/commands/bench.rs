//! Bench Command
//!
//! Measures end-to-end hashing throughput with one pipelined VM per worker
//! thread, the way a miner drives the engine.

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use rayon::prelude::*;

use super::{build_engine, VariantArg};

#[derive(Args)]
pub struct BenchArgs {
    /// Parameter set
    #[arg(short, long, value_enum, default_value_t = VariantArg::Monero)]
    pub variant: VariantArg,

    /// Seed key the cache is derived from
    #[arg(short, long, default_value = "quasar bench key")]
    pub key: String,

    /// Total number of hashes
    #[arg(short, long, default_value_t = 64)]
    pub count: u64,

    /// Hashing worker threads (0 = all cores)
    #[arg(short, long, default_value_t = 0)]
    pub workers: usize,

    /// Expand the full dataset before hashing
    #[arg(long)]
    pub full: bool,

    /// Use the precompiled execution backend
    #[arg(long)]
    pub precompiled: bool,
}

pub fn bench_mode(args: &BenchArgs) -> Result<()> {
    let workers = if args.workers == 0 {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    } else {
        args.workers
    };

    let setup = Instant::now();
    let engine = build_engine(
        args.variant,
        args.key.as_bytes(),
        args.full,
        0,
        args.precompiled,
    )?;
    println!(
        "setup: {:.2?} ({} mode)",
        setup.elapsed(),
        if engine.is_full_memory() { "full" } else { "light" }
    );

    let started = Instant::now();
    let hashed: u64 = (0..workers as u64)
        .into_par_iter()
        .map(|worker| -> u64 {
            let share = args.count / workers as u64
                + u64::from(worker < args.count % workers as u64);
            if share == 0 {
                return 0;
            }
            let Ok(mut vm) = engine.create_vm() else {
                return 0;
            };

            // Pipelined nonce loop: finish one hash while seeding the next.
            let nonce = |n: u64| ((worker << 32) | n).to_le_bytes();
            if vm.hash_first(&nonce(0)).is_err() {
                return 0;
            }
            for n in 1..share {
                if vm.hash_next(&nonce(n)).is_err() {
                    return n;
                }
            }
            if vm.hash_last().is_err() {
                return share - 1;
            }
            share
        })
        .sum();
    let elapsed = started.elapsed();

    println!(
        "{hashed} hashes in {:.2?} on {workers} workers: {:.2} H/s",
        elapsed,
        hashed as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
