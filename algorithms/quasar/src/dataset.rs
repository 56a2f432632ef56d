//! Dataset expansion.
//!
//! The dataset is the full-memory working set: every 64-byte item is derived
//! from the cache by seeding eight registers from the item number, then
//! alternating mixing-program execution with cache-line injection. Items are
//! independent of each other, so initialisation parallelises over disjoint
//! item ranges.

use std::sync::Arc;
use std::time::Instant;

use log::info;

use crate::cache::Cache;
use crate::config::Configuration;
use crate::kernels::constants::{CACHE_LINE_SIZE, ITEM_MUL, ITEM_XOR};
use crate::memory::{AlignedBuffer, AllocRequest, PageKind};
use crate::superscalar;
use crate::types::{Error, Flags, Result};

/// Computes one dataset item from the cache.
pub(crate) fn init_item(cache: &Cache, item: u64) -> [u64; 8] {
    let mut r = [0_u64; 8];
    r[0] = item.wrapping_add(1).wrapping_mul(ITEM_MUL);
    for i in 1..8 {
        r[i] = r[0] ^ ITEM_XOR[i - 1];
    }

    let mut register_value = item;
    for program in cache.programs() {
        let line = cache.line(register_value);
        superscalar::execute(program, &mut r);
        for (reg, word) in r.iter_mut().zip(line) {
            *reg ^= word;
        }
        register_value = r[program.address_register];
    }
    r
}

fn fill_items(cache: &Cache, start_item: u64, out: &mut [u8]) {
    for (i, chunk) in out.chunks_exact_mut(CACHE_LINE_SIZE).enumerate() {
        let words = init_item(cache, start_item + i as u64);
        for (slot, word) in chunk.chunks_exact_mut(8).zip(words) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// Writes items `start_item..start_item + count` into `out`, which must be
/// exactly `count` cache lines long. This is the building block both the
/// in-crate initialisation and external (C API) dataset memory use.
pub fn initialize_items(cache: &Cache, start_item: u64, count: u64, out: &mut [u8]) -> Result<()> {
    if out.len() as u64 != count * CACHE_LINE_SIZE as u64 {
        return Err(Error::Config("output buffer does not match the item count"));
    }
    fill_items(cache, start_item, out);
    Ok(())
}

/// Parallel version of [`initialize_items`], splitting the range over
/// `threads` workers.
#[cfg(feature = "multithread")]
pub fn initialize_items_parallel(
    cache: &Cache,
    start_item: u64,
    count: u64,
    out: &mut [u8],
    threads: usize,
) -> Result<()> {
    if out.len() as u64 != count * CACHE_LINE_SIZE as u64 {
        return Err(Error::Config("output buffer does not match the item count"));
    }
    if threads <= 1 {
        fill_items(cache, start_item, out);
        return Ok(());
    }

    let threads = threads.min(count.max(1) as usize);
    rayon::scope(|scope| {
        let mut rest = out;
        for worker in 0..threads {
            let range = worker_range(count, threads, worker);
            let share = range.end - range.start;
            let (chunk, tail) = rest.split_at_mut((share * CACHE_LINE_SIZE as u64) as usize);
            rest = tail;
            let item = start_item + range.start;
            scope.spawn(move |_| fill_items(cache, item, chunk));
        }
    });
    Ok(())
}

/// Item range handled by `worker` of `threads`. Boundaries are placed at
/// `i * count / threads`, so uneven counts widen the later ranges.
#[cfg(feature = "multithread")]
const fn worker_range(count: u64, threads: usize, worker: usize) -> core::ops::Range<u64> {
    let threads = threads as u64;
    (worker as u64 * count / threads)..((worker as u64 + 1) * count / threads)
}

// =============================================================================
// DATASET
// =============================================================================

/// The fully expanded dataset.
pub struct Dataset {
    cfg: Arc<Configuration>,
    buffer: AlignedBuffer,
}

impl Dataset {
    /// Allocates an uninitialised (zeroed) dataset. `flags` selects the page
    /// backing; allocation degrades to smaller pages rather than failing.
    pub fn new(cfg: &Arc<Configuration>, flags: Flags, numa_node: Option<u32>) -> Result<Self> {
        cfg.validate()?;
        let buffer = AlignedBuffer::allocate(&AllocRequest {
            size: cfg.dataset_size() as usize,
            large_pages: flags.contains(Flags::LARGE_PAGES),
            one_gb_pages: flags.contains(Flags::ONE_GB_PAGES),
            numa_node,
        })?;
        Ok(Self {
            cfg: Arc::clone(cfg),
            buffer,
        })
    }

    /// The configuration this dataset was allocated for.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.cfg
    }

    /// Number of 64-byte items.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.cfg.dataset_item_count()
    }

    /// Achieved page backing.
    #[must_use]
    pub fn page_kind(&self) -> PageKind {
        self.buffer.page_kind()
    }

    /// The raw dataset bytes.
    #[must_use]
    pub fn memory(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Initialises the item range `start_item..start_item + count` from
    /// `cache`, which must use the same configuration.
    pub fn init(&mut self, cache: &Cache, start_item: u64, count: u64) -> Result<()> {
        self.check_cache(cache)?;
        let end = start_item
            .checked_add(count)
            .ok_or(Error::Config("item range overflows"))?;
        if end > self.item_count() {
            return Err(Error::Config("item range exceeds the dataset"));
        }
        let offset = (start_item * CACHE_LINE_SIZE as u64) as usize;
        let len = (count * CACHE_LINE_SIZE as u64) as usize;
        initialize_items(
            cache,
            start_item,
            count,
            &mut self.buffer.as_mut_slice()[offset..offset + len],
        )
    }

    /// Initialises the whole dataset with `threads` workers.
    pub fn init_full(&mut self, cache: &Cache, threads: usize) -> Result<()> {
        self.check_cache(cache)?;
        let started = Instant::now();
        let count = self.item_count();

        #[cfg(feature = "multithread")]
        initialize_items_parallel(cache, 0, count, self.buffer.as_mut_slice(), threads)?;
        #[cfg(not(feature = "multithread"))]
        {
            let _ = threads;
            initialize_items(cache, 0, count, self.buffer.as_mut_slice())?;
        }

        info!(
            "dataset initialised: {} items, {} threads, {:.2?}",
            count,
            threads,
            started.elapsed()
        );
        Ok(())
    }

    fn check_cache(&self, cache: &Cache) -> Result<()> {
        if **cache.config() == **self.config() {
            Ok(())
        } else {
            Err(Error::Config("cache and dataset configurations differ"))
        }
    }

    /// Reads item `index` as eight words.
    pub(crate) fn line(&self, index: u64) -> [u64; 8] {
        let offset = (index * CACHE_LINE_SIZE as u64) as usize;
        let bytes = &self.buffer.as_slice()[offset..offset + CACHE_LINE_SIZE];
        let mut line = [0_u64; 8];
        for (word, chunk) in line.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut le = [0_u8; 8];
            le.copy_from_slice(chunk);
            *word = u64::from_le_bytes(le);
        }
        line
    }
}

impl core::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dataset")
            .field("variant", &self.cfg.variant)
            .field("items", &self.item_count())
            .field("pages", &self.page_kind())
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

    fn tiny_cache() -> Cache {
        let mut cfg = (*Variant::Monero.configuration()).clone();
        cfg.argon_memory = 256;
        cfg.argon_iterations = 1;
        Cache::new(&Arc::new(cfg), b"dataset test key").unwrap()
    }

    #[test]
    fn items_depend_on_their_number() {
        let cache = tiny_cache();
        let a = init_item(&cache, 0);
        let b = init_item(&cache, 1);
        let c = init_item(&cache, 0);
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn item_ranges_are_position_independent() {
        // Items computed in a subrange equal the same items computed from 0.
        let cache = tiny_cache();
        let mut whole = vec![0_u8; 64 * 64];
        initialize_items(&cache, 0, 64, &mut whole).unwrap();

        let mut tail = vec![0_u8; 16 * 64];
        initialize_items(&cache, 48, 16, &mut tail).unwrap();
        assert_eq!(&whole[48 * 64..], &tail[..]);
    }

    #[cfg(feature = "multithread")]
    #[test]
    fn parallel_matches_serial() {
        let cache = tiny_cache();
        let mut serial = vec![0_u8; 1000 * 64];
        initialize_items(&cache, 0, 1000, &mut serial).unwrap();

        // Worker counts that do and do not divide the item count evenly.
        for threads in [1, 2, 3, 5, 7, 16] {
            let mut parallel = vec![0_u8; 1000 * 64];
            initialize_items_parallel(&cache, 0, 1000, &mut parallel, threads).unwrap();
            assert_eq!(serial, parallel, "threads = {threads}");
        }
    }

    #[cfg(feature = "multithread")]
    #[test]
    fn worker_ranges_partition_the_items() {
        for count in [1000_u64, 999, 16, 1] {
            for threads in [1_usize, 2, 3, 5, 7, 16] {
                let threads = threads.min(count as usize);
                let mut next = 0;
                for worker in 0..threads {
                    let range = worker_range(count, threads, worker);
                    assert_eq!(range.start, next, "count {count}, threads {threads}");
                    assert_eq!(range.start, worker as u64 * count / threads as u64);
                    next = range.end;
                }
                assert_eq!(next, count, "count {count}, threads {threads}");
            }
        }
    }

    #[test]
    fn buffer_size_is_checked() {
        let cache = tiny_cache();
        let mut short = vec![0_u8; 63];
        assert!(initialize_items(&cache, 0, 1, &mut short).is_err());
    }
}
