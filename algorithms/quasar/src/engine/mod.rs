//! The engine facade.
//!
//! An [`Engine`] owns one cache generation and, in full-memory operation,
//! the expanded dataset, and hands out VMs bound to them. Re-keying builds
//! a fresh generation and swaps it in; VMs created earlier keep hashing
//! against the old generation until they are rebound, so a pool of workers
//! can roll over without a global pause.

use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::cache::Cache;
use crate::config::{Configuration, Variant};
use crate::dataset::Dataset;
use crate::types::{Flags, Result};
use crate::vm::Vm;

/// How the engine chooses between light and full-memory hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// Always expand the dataset; fail when it cannot be allocated.
    AlwaysFull,
    /// Never expand the dataset; hash from the cache alone.
    AlwaysLight,
    /// Expand the dataset when the machine has enough free memory,
    /// otherwise fall back to light hashing.
    #[default]
    Auto,
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// The parameter set to hash with.
    pub variant: Variant,
    /// Light/full memory policy.
    pub mode: MemoryMode,
    /// Allocation and execution flags for VMs and the dataset.
    pub flags: Flags,
    /// Worker threads for dataset expansion; 0 means all available cores.
    pub init_threads: usize,
    /// Preferred NUMA node for the dataset allocation.
    pub numa_node: Option<u32>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            mode: MemoryMode::default(),
            flags: Flags::empty(),
            init_threads: 0,
            numa_node: None,
        }
    }
}

/// A keyed hashing engine: one cache generation plus an optional dataset.
pub struct Engine {
    cfg: Arc<Configuration>,
    flags: Flags,
    init_threads: usize,
    numa_node: Option<u32>,
    cache: Arc<Cache>,
    dataset: Option<Arc<Dataset>>,
}

impl Engine {
    /// Builds an engine for `options.variant`, keyed with `key`.
    pub fn new(options: &EngineOptions, key: &[u8]) -> Result<Self> {
        Self::with_configuration(&options.variant.configuration(), options, key)
    }

    /// Builds an engine with an explicit configuration, for parameter sets
    /// that differ from the stock variants.
    pub fn with_configuration(
        cfg: &Arc<Configuration>,
        options: &EngineOptions,
        key: &[u8],
    ) -> Result<Self> {
        cfg.validate()?;
        // FULL_MEM is derived from the memory mode, not passed through.
        let flags = options.flags.difference(Flags::FULL_MEM);
        let cache = Arc::new(Cache::new(cfg, key)?);

        let mut engine = Self {
            cfg: Arc::clone(cfg),
            flags,
            init_threads: options.init_threads,
            numa_node: options.numa_node,
            cache,
            dataset: None,
        };

        let want_full = match options.mode {
            MemoryMode::AlwaysFull => true,
            MemoryMode::AlwaysLight => false,
            MemoryMode::Auto => {
                let fits = enough_memory(cfg);
                if !fits {
                    warn!(
                        "not enough free memory for the {} MiB dataset, hashing in light mode",
                        cfg.dataset_size() >> 20
                    );
                }
                fits
            }
        };
        if want_full {
            match engine.build_dataset() {
                Ok(dataset) => engine.dataset = Some(Arc::new(dataset)),
                Err(err) if options.mode == MemoryMode::Auto => {
                    warn!("dataset allocation failed ({err}), hashing in light mode");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            "engine ready: variant {}, {} mode",
            engine.cfg.variant,
            if engine.is_full_memory() { "full" } else { "light" }
        );
        Ok(engine)
    }

    /// The configuration the engine hashes with.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.cfg
    }

    /// The current cache generation.
    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// The current dataset, when hashing in full-memory mode.
    #[must_use]
    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        self.dataset.as_ref()
    }

    /// Whether VMs created by this engine read from an expanded dataset.
    #[must_use]
    pub fn is_full_memory(&self) -> bool {
        self.dataset.is_some()
    }

    /// Creates a VM bound to the current generation.
    pub fn create_vm(&self) -> Result<Vm> {
        match &self.dataset {
            Some(dataset) => Vm::full(Arc::clone(dataset), self.flags),
            None => Vm::light(Arc::clone(&self.cache), self.flags),
        }
    }

    /// Re-keys the engine: builds a new cache generation (and dataset, in
    /// full-memory mode) and swaps it in. A no-op when the key is unchanged.
    /// Existing VMs keep their old binding until rebound via
    /// [`Vm::set_cache`] / [`Vm::set_dataset`].
    pub fn reseed(&mut self, key: &[u8]) -> Result<()> {
        if self.cache.key() == key {
            return Ok(());
        }
        let cache = Arc::new(Cache::new(&self.cfg, key)?);
        let threads = self.worker_threads();
        if let Some(slot) = &mut self.dataset {
            // Re-fill in place when no VM holds the old generation,
            // otherwise expand into a fresh allocation.
            match Arc::get_mut(slot) {
                Some(dataset) => dataset.init_full(&cache, threads)?,
                None => {
                    let mut dataset = self.allocate_dataset()?;
                    dataset.init_full(&cache, threads)?;
                    self.dataset = Some(Arc::new(dataset));
                }
            }
        }
        self.cache = cache;
        Ok(())
    }

    fn allocate_dataset(&self) -> Result<Dataset> {
        Dataset::new(&self.cfg, self.flags, self.numa_node)
    }

    fn build_dataset(&self) -> Result<Dataset> {
        let mut dataset = self.allocate_dataset()?;
        dataset.init_full(&self.cache, self.worker_threads())?;
        Ok(dataset)
    }

    fn worker_threads(&self) -> usize {
        if self.init_threads == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.init_threads
        }
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("variant", &self.cfg.variant)
            .field("full_memory", &self.is_full_memory())
            .finish()
    }
}

/// Whether the machine has room for the dataset next to the cache.
fn enough_memory(cfg: &Configuration) -> bool {
    let required = cfg.dataset_size() + cfg.cache_size() as u64;
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.available_memory() >= required
}

// Engines are only handed out behind exclusive access or Arc; the shared
// pieces (cache, dataset) are immutable once published.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Engine>()
};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A configuration whose cache and dataset both fit a test process.
    fn tiny_config() -> Arc<Configuration> {
        let mut cfg = (*Variant::Monero.configuration()).clone();
        cfg.argon_memory = 256;
        cfg.argon_iterations = 1;
        cfg.program_count = 2;
        cfg.program_iterations = 64;
        cfg.dataset_base_size = 1 << 22;
        cfg.dataset_extra_size = 0;
        Arc::new(cfg)
    }

    fn options(mode: MemoryMode) -> EngineOptions {
        EngineOptions {
            mode,
            ..EngineOptions::default()
        }
    }

    #[test]
    fn light_and_full_engines_agree() {
        let cfg = tiny_config();
        let light =
            Engine::with_configuration(&cfg, &options(MemoryMode::AlwaysLight), b"engine key")
                .unwrap();
        let full =
            Engine::with_configuration(&cfg, &options(MemoryMode::AlwaysFull), b"engine key")
                .unwrap();
        assert!(!light.is_full_memory());
        assert!(full.is_full_memory());

        let mut lvm = light.create_vm().unwrap();
        let mut fvm = full.create_vm().unwrap();
        for input in [&b"block 1"[..], b"block 2", b""] {
            assert_eq!(lvm.hash(input).unwrap(), fvm.hash(input).unwrap());
        }
    }

    #[test]
    fn reseed_swaps_the_generation() {
        let cfg = tiny_config();
        let mut engine =
            Engine::with_configuration(&cfg, &options(MemoryMode::AlwaysLight), b"key 1").unwrap();
        let before = Arc::clone(engine.cache());
        let h1 = engine.create_vm().unwrap().hash(b"payload").unwrap();

        // Same key: nothing changes, not even the Arc.
        engine.reseed(b"key 1").unwrap();
        assert!(Arc::ptr_eq(&before, engine.cache()));

        engine.reseed(b"key 2").unwrap();
        assert!(!Arc::ptr_eq(&before, engine.cache()));
        let h2 = engine.create_vm().unwrap().hash(b"payload").unwrap();
        assert_ne!(h1, h2);

        // Old VMs can be rolled onto the new generation.
        let mut stale = Vm::light(before, Flags::empty()).unwrap();
        assert_eq!(stale.hash(b"payload").unwrap(), h1);
        stale.set_cache(Arc::clone(engine.cache())).unwrap();
        assert_eq!(stale.hash(b"payload").unwrap(), h2);
    }

    #[test]
    fn full_mode_reseed_reuses_unique_datasets() {
        let cfg = tiny_config();
        let mut engine =
            Engine::with_configuration(&cfg, &options(MemoryMode::AlwaysFull), b"key 1").unwrap();
        let h1 = engine.create_vm().unwrap().hash(b"payload").unwrap();

        engine.reseed(b"key 2").unwrap();
        let h2 = engine.create_vm().unwrap().hash(b"payload").unwrap();
        assert_ne!(h1, h2);

        // A light engine on the same key must agree with the re-filled
        // dataset.
        let light =
            Engine::with_configuration(&cfg, &options(MemoryMode::AlwaysLight), b"key 2").unwrap();
        assert_eq!(
            light.create_vm().unwrap().hash(b"payload").unwrap(),
            h2
        );
    }

    #[test]
    fn auto_mode_picks_a_working_setup() {
        let cfg = tiny_config();
        let engine =
            Engine::with_configuration(&cfg, &options(MemoryMode::Auto), b"auto key").unwrap();
        engine.create_vm().unwrap().hash(b"anything").unwrap();
    }

    #[test]
    fn full_mem_flag_is_not_taken_from_options() {
        let cfg = tiny_config();
        let mut opts = options(MemoryMode::AlwaysLight);
        opts.flags = Flags::FULL_MEM;
        let engine = Engine::with_configuration(&cfg, &opts, b"flag key").unwrap();
        assert!(!engine.is_full_memory());
        engine.create_vm().unwrap().hash(b"ok").unwrap();
    }
}
