//! Quasar is a memory-hard proof-of-work compute engine.
//!
//! Hash throughput is bound to memory latency and to the execution profile
//! of a simulated superscalar CPU: a key-derived Argon2d cache is expanded
//! (optionally) into a multi-gigabyte dataset, and every hash runs a chain
//! of randomized programs over a scratchpad with interleaved dataset reads.
//!
//! The crate exposes three levels:
//!
//! * [`Engine`] — keyed facade that owns the cache/dataset generation and
//!   hands out VMs; the right entry point for most embedders.
//! * [`Cache`], [`Dataset`], [`Vm`] — the building blocks, for callers that
//!   manage memory and threading themselves.
//! * [`ffi`] — a C ABI over the same handles.
//!
//! ```no_run
//! use quasar::{Engine, EngineOptions};
//!
//! let engine = Engine::new(&EngineOptions::default(), b"seed key")?;
//! let mut vm = engine.create_vm()?;
//! let digest = vm.hash(b"input data")?;
//! # Ok::<(), quasar::Error>(())
//! ```

mod kernels;
mod superscalar;

pub mod cache;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod ffi;
pub mod memory;
pub mod types;
pub mod vm;

pub use cache::Cache;
pub use config::{Configuration, Variant, Weights};
#[cfg(feature = "multithread")]
pub use dataset::initialize_items_parallel;
pub use dataset::{initialize_items, Dataset};
pub use engine::{Engine, EngineOptions, MemoryMode};
pub use memory::PageKind;
pub use types::{Digest, Error, Flags, Result, DIGEST_SIZE};
pub use vm::Vm;

/// One-shot light-mode hash: builds a cache for `key`, hashes `input` and
/// throws the cache away. Convenient for verifiers that see a key once;
/// keep an [`Engine`] around for anything repeated.
pub fn hash(variant: Variant, key: &[u8], input: &[u8]) -> Result<Digest> {
    let cache = std::sync::Arc::new(Cache::new(&variant.configuration(), key)?);
    Vm::light(cache, Flags::empty())?.hash(input)
}

/// Compares a digest against an expected value in constant time.
#[must_use]
pub fn verify(digest: &Digest, expected: &Digest) -> bool {
    use subtle::ConstantTimeEq;
    digest.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_is_equality() {
        let a = [7_u8; DIGEST_SIZE];
        let mut b = a;
        assert!(verify(&a, &b));
        b[31] ^= 1;
        assert!(!verify(&a, &b));
    }
}
