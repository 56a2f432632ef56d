//! The key-derived cache.
//!
//! A cache is the light-mode working set: a few hundred MiB of Argon2d
//! blocks derived from the key, plus the chain of generated mixing programs
//! that expand cache lines into dataset items. Caches are immutable after
//! construction and shared behind `Arc`, so re-keying is done by building a
//! fresh cache and swapping bindings, or by [`Cache::reinit`] when the cache
//! is not shared.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::config::Configuration;
use crate::superscalar::{self, BlakeGenerator};
use crate::types::Result;

pub(crate) mod argon2d;

/// Argon2d memory plus the derived mixing programs for one key.
pub struct Cache {
    cfg: Arc<Configuration>,
    key: Vec<u8>,
    memory: Vec<argon2d::Block>,
    programs: Vec<superscalar::Program>,
}

impl Cache {
    /// Builds a cache for `key`. This runs the full Argon2d fill and is the
    /// expensive part of re-keying.
    pub fn new(cfg: &Arc<Configuration>, key: &[u8]) -> Result<Self> {
        cfg.validate()?;
        let mut cache = Self {
            cfg: Arc::clone(cfg),
            key: Vec::new(),
            memory: Vec::new(),
            programs: Vec::new(),
        };
        cache.rebuild(key)?;
        Ok(cache)
    }

    /// Re-keys the cache in place. A no-op when `key` already matches.
    pub fn reinit(&mut self, key: &[u8]) -> Result<()> {
        if self.key == key {
            debug!("cache already keyed for this seed, skipping rebuild");
            return Ok(());
        }
        self.rebuild(key)
    }

    fn rebuild(&mut self, key: &[u8]) -> Result<()> {
        let started = Instant::now();
        self.memory = argon2d::fill(
            key,
            self.cfg.argon_salt,
            argon2d::Params {
                m_cost: self.cfg.argon_memory,
                t_cost: self.cfg.argon_iterations,
                lanes: self.cfg.argon_lanes,
            },
        )?;

        let mut gen = BlakeGenerator::new(key, 0);
        self.programs = (0..self.cfg.cache_accesses)
            .map(|_| superscalar::Program::generate(&mut gen, self.cfg.superscalar_latency))
            .collect();
        self.key = key.to_vec();

        info!(
            "cache built: {} MiB, {} programs, {:.2?}",
            self.size() >> 20,
            self.programs.len(),
            started.elapsed()
        );
        Ok(())
    }

    /// The configuration this cache was built for.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.cfg
    }

    /// The key this cache is currently built for.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Cache size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.memory.len() * 1024
    }

    pub(crate) fn programs(&self) -> &[superscalar::Program] {
        &self.programs
    }

    /// Reads cache line `index` (modulo the line count) as eight words.
    pub(crate) fn line(&self, index: u64) -> [u64; 8] {
        let index = index & (self.cfg.cache_line_count() - 1);
        let block = &self.memory[(index / 16) as usize];
        let start = ((index % 16) * 8) as usize;
        let mut line = [0_u64; 8];
        line.copy_from_slice(&block[start..start + 8]);
        line
    }
}

impl core::fmt::Debug for Cache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cache")
            .field("variant", &self.cfg.variant)
            .field("size", &self.size())
            .field("programs", &self.programs.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Variant;

    fn tiny_config() -> Arc<Configuration> {
        let mut cfg = (*Variant::Monero.configuration()).clone();
        cfg.argon_memory = 256;
        cfg.argon_iterations = 1;
        Arc::new(cfg)
    }

    #[test]
    fn cache_is_deterministic_per_key() {
        let cfg = tiny_config();
        let a = Cache::new(&cfg, b"key a").unwrap();
        let b = Cache::new(&cfg, b"key a").unwrap();
        let c = Cache::new(&cfg, b"key b").unwrap();

        assert_eq!(a.line(0), b.line(0));
        assert_eq!(a.line(4095), b.line(4095));
        assert_ne!(a.line(0), c.line(0));
        assert_eq!(a.size(), 256 * 1024);
    }

    #[test]
    fn program_chain_has_configured_length() {
        let cfg = tiny_config();
        let cache = Cache::new(&cfg, b"progs").unwrap();
        assert_eq!(cache.programs().len(), cfg.cache_accesses);
    }

    #[test]
    fn reinit_changes_contents_only_for_new_keys() {
        let cfg = tiny_config();
        let mut cache = Cache::new(&cfg, b"first").unwrap();
        let line = cache.line(17);

        cache.reinit(b"first").unwrap();
        assert_eq!(cache.line(17), line);

        cache.reinit(b"second").unwrap();
        assert_ne!(cache.line(17), line);
        assert_eq!(cache.key(), b"second");
    }

    #[test]
    fn line_reads_wrap_at_cache_size() {
        let cfg = tiny_config();
        let cache = Cache::new(&cfg, b"wrap").unwrap();
        assert_eq!(cache.line(0), cache.line(cfg.cache_line_count()));
    }
}
