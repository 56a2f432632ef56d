//! The hashing virtual machine.
//!
//! A VM owns a scratchpad and a register file and is bound to either a cache
//! (light mode) or a fully expanded dataset. Hashing expands the input into
//! a chain of randomized programs, runs each one over the scratchpad with
//! interleaved dataset reads, and condenses the final machine state into a
//! 256-bit digest. VMs are single-threaded; for concurrent hashing, create
//! one VM per worker and share the cache or dataset through `Arc`.

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Configuration;
use crate::dataset::{self, Dataset};
use crate::kernels::constants::{
    CACHE_LINE_SIZE, FLOAT_REGISTER_COUNT, REGISTER_COUNT, REGISTER_FILE_SIZE, SEED_SIZE,
};
use crate::kernels::{aes, fenv};
use crate::memory::{AlignedBuffer, AllocRequest};
use crate::types::{Digest, Error, Flags, Result, DIGEST_SIZE};

mod bytecode;
mod program;

use bytecode::Bc;
use program::{Program, ProgramContext};

// =============================================================================
// REGISTER FILE
// =============================================================================

/// The VM register file: eight integer registers, four group-F and four
/// group-E float register pairs, and four read-only pairs.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RegisterFile {
    pub r: [u64; REGISTER_COUNT],
    pub f: [[f64; 2]; FLOAT_REGISTER_COUNT],
    pub e: [[f64; 2]; FLOAT_REGISTER_COUNT],
    pub a: [[f64; 2]; FLOAT_REGISTER_COUNT],
}

impl RegisterFile {
    /// Serialises the registers in r, f, e, a order, little endian.
    fn to_bytes(self) -> [u8; REGISTER_FILE_SIZE] {
        let mut bytes = [0_u8; REGISTER_FILE_SIZE];
        let mut cursor = bytes.chunks_exact_mut(8);
        for word in self.r {
            if let Some(slot) = cursor.next() {
                slot.copy_from_slice(&word.to_le_bytes());
            }
        }
        for group in [self.f, self.e, self.a] {
            for pair in group {
                for lane in pair {
                    if let Some(slot) = cursor.next() {
                        slot.copy_from_slice(&lane.to_bits().to_le_bytes());
                    }
                }
            }
        }
        bytes
    }
}

// =============================================================================
// EXECUTION BACKENDS
// =============================================================================

/// Backend seam between the soft interpreter and the ahead-of-time lowered
/// path. Both produce bit-identical results; they differ in when the raw
/// instruction bytes are lowered.
trait Executor: Send {
    /// Called once when a new program is about to run.
    fn load(&mut self, program: &Program, cfg: &Configuration);

    /// Returns the instruction stream for the next iteration.
    fn iteration_code(&mut self, program: &Program, cfg: &Configuration) -> &[Bc];
}

/// Lowers the program again on every iteration, the way a plain
/// fetch-decode-execute interpreter would.
#[derive(Default)]
struct Interpreted {
    code: Vec<Bc>,
}

impl Executor for Interpreted {
    fn load(&mut self, _: &Program, _: &Configuration) {}

    fn iteration_code(&mut self, program: &Program, cfg: &Configuration) -> &[Bc] {
        bytecode::decode(&program.code, cfg, &mut self.code);
        &self.code
    }
}

/// Lowers each program once and reuses the bytecode for all iterations.
#[derive(Default)]
struct Precompiled {
    code: Vec<Bc>,
}

impl Executor for Precompiled {
    fn load(&mut self, program: &Program, cfg: &Configuration) {
        bytecode::decode(&program.code, cfg, &mut self.code);
    }

    fn iteration_code(&mut self, _: &Program, _: &Configuration) -> &[Bc] {
        &self.code
    }
}

// =============================================================================
// VM
// =============================================================================

/// Memory binding of a VM: the cache for light hashing, the dataset for
/// full-memory hashing.
enum Binding {
    Light(Arc<Cache>),
    Full(Arc<Dataset>),
}

impl Binding {
    fn line(&self, index: u64) -> [u64; 8] {
        match self {
            Self::Full(ds) => ds.line(index),
            Self::Light(cache) => dataset::init_item(cache, index),
        }
    }
}

/// A single-threaded hashing machine.
pub struct Vm {
    cfg: Arc<Configuration>,
    flags: Flags,
    binding: Binding,
    scratchpad: AlignedBuffer,
    reg: RegisterFile,
    program: Program,
    executor: Box<dyn Executor>,
    pending: Option<[u8; SEED_SIZE]>,
}

impl Vm {
    /// Creates a light-mode VM computing dataset items from `cache` on the
    /// fly.
    pub fn light(cache: Arc<Cache>, flags: Flags) -> Result<Self> {
        if flags.contains(Flags::FULL_MEM) {
            return Err(Error::Config("full-memory flag requires a dataset"));
        }
        Self::build(Arc::clone(cache.config()), Binding::Light(cache), flags)
    }

    /// Creates a full-memory VM reading items straight from `dataset`.
    pub fn full(dataset: Arc<Dataset>, flags: Flags) -> Result<Self> {
        Self::build(
            Arc::clone(dataset.config()),
            Binding::Full(dataset),
            flags | Flags::FULL_MEM,
        )
    }

    fn build(cfg: Arc<Configuration>, binding: Binding, flags: Flags) -> Result<Self> {
        cfg.validate()?;
        let scratchpad = AlignedBuffer::allocate(&AllocRequest {
            size: cfg.scratchpad_l3 as usize,
            large_pages: flags.contains(Flags::LARGE_PAGES),
            one_gb_pages: false,
            numa_node: None,
        })?;
        let executor: Box<dyn Executor> = if flags.contains(Flags::PRECOMPILED) {
            Box::new(Precompiled::default())
        } else {
            Box::new(Interpreted::default())
        };
        let program = Program::new(&cfg);
        Ok(Self {
            cfg,
            flags,
            binding,
            scratchpad,
            reg: RegisterFile::default(),
            program,
            executor,
            pending: None,
        })
    }

    /// The configuration this VM hashes with.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.cfg
    }

    /// The flags this VM was created with.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Rebinds a light-mode VM to a new cache, typically after re-keying.
    pub fn set_cache(&mut self, cache: Arc<Cache>) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::VmBusy);
        }
        if **cache.config() != *self.cfg {
            return Err(Error::Config("cache configuration does not match the VM"));
        }
        match &mut self.binding {
            Binding::Light(slot) => {
                *slot = cache;
                Ok(())
            }
            Binding::Full(_) => Err(Error::MissingCache),
        }
    }

    /// Rebinds a full-memory VM to a new dataset.
    pub fn set_dataset(&mut self, dataset: Arc<Dataset>) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::VmBusy);
        }
        if **dataset.config() != *self.cfg {
            return Err(Error::Config("dataset configuration does not match the VM"));
        }
        match &mut self.binding {
            Binding::Full(slot) => {
                *slot = dataset;
                Ok(())
            }
            Binding::Light(_) => Err(Error::MissingDataset),
        }
    }

    // -------------------------------------------------------------------------
    // Hashing
    // -------------------------------------------------------------------------

    /// Hashes `input` to a 256-bit digest.
    pub fn hash(&mut self, input: &[u8]) -> Result<Digest> {
        if self.pending.is_some() {
            return Err(Error::VmBusy);
        }
        let mut seed = blake_seed(input);
        self.init_scratchpad(&mut seed);
        self.run_chain(&mut seed);
        Ok(self.finalize())
    }

    /// Begins a pipelined hash: expands `input` into the scratchpad and
    /// leaves the program chain for [`Vm::hash_next`] or [`Vm::hash_last`].
    pub fn hash_first(&mut self, input: &[u8]) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::VmBusy);
        }
        let mut seed = blake_seed(input);
        self.init_scratchpad(&mut seed);
        self.pending = Some(seed);
        Ok(())
    }

    /// Finishes the in-flight hash and starts the next one.
    pub fn hash_next(&mut self, next_input: &[u8]) -> Result<Digest> {
        let Some(mut seed) = self.pending.take() else {
            return Err(Error::VmIdle);
        };
        self.run_chain(&mut seed);
        let digest = self.finalize();

        let mut next_seed = blake_seed(next_input);
        self.init_scratchpad(&mut next_seed);
        self.pending = Some(next_seed);
        Ok(digest)
    }

    /// Finishes the in-flight hash and leaves the VM idle.
    pub fn hash_last(&mut self) -> Result<Digest> {
        let Some(mut seed) = self.pending.take() else {
            return Err(Error::VmIdle);
        };
        self.run_chain(&mut seed);
        Ok(self.finalize())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn init_scratchpad(&mut self, seed: &mut [u8; SEED_SIZE]) {
        aes::fill_1r(seed, self.scratchpad.as_mut_slice());
    }

    fn run_chain(&mut self, seed: &mut [u8; SEED_SIZE]) {
        fenv::reset_rounding_mode();
        for chain in 0..self.cfg.program_count {
            self.program.generate(seed, &self.cfg);
            let ctx = ProgramContext::new(&self.program.entropy, &self.cfg);
            self.run_program(&ctx);
            if chain + 1 < self.cfg.program_count {
                *seed = blake_seed(&self.reg.to_bytes());
            }
        }
    }

    fn run_program(&mut self, ctx: &ProgramContext) {
        let Self {
            cfg,
            binding,
            scratchpad,
            reg,
            program,
            executor,
            ..
        } = self;
        let sp = scratchpad.as_mut_slice();

        *reg = RegisterFile {
            a: ctx.a,
            ..RegisterFile::default()
        };
        executor.load(program, cfg);

        let l3_line_mask = cfg.l3_mask_64();
        let align_mask = cfg.dataset_align_mask() as u32;
        let mut sp_addr0 = u64::from(ctx.mx);
        let mut sp_addr1 = u64::from(ctx.ma);
        let mut mx = ctx.mx;
        let mut ma = ctx.ma;

        for _ in 0..cfg.program_iterations {
            let sp_mix = reg.r[ctx.read_reg[0]] ^ reg.r[ctx.read_reg[1]];
            sp_addr0 = (sp_addr0 ^ sp_mix) & l3_line_mask;
            sp_addr1 = (sp_addr1 ^ (sp_mix >> 32)) & l3_line_mask;

            for (i, r) in reg.r.iter_mut().enumerate() {
                *r ^= bytecode::load_u64(sp, sp_addr0 + 8 * i as u64);
            }
            for (i, f) in reg.f.iter_mut().enumerate() {
                *f = bytecode::load_f64_pair(sp, sp_addr1 + 8 * i as u64);
            }
            for (i, e) in reg.e.iter_mut().enumerate() {
                *e = bytecode::mask_e(
                    bytecode::load_f64_pair(sp, sp_addr1 + 8 * (4 + i as u64)),
                    ctx.e_mask,
                );
            }

            let code = executor.iteration_code(program, cfg);
            bytecode::execute(code, reg, sp, ctx.e_mask);

            mx ^= (reg.r[ctx.read_reg[2]] ^ reg.r[ctx.read_reg[3]]) as u32;
            mx &= align_mask;
            let item = (ctx.dataset_offset + u64::from(ma)) / CACHE_LINE_SIZE as u64;
            let line = binding.line(item);
            for (r, word) in reg.r.iter_mut().zip(line) {
                *r ^= word;
            }
            core::mem::swap(&mut mx, &mut ma);

            for (i, r) in reg.r.iter().enumerate() {
                bytecode::store_u64(sp, sp_addr1 + 8 * i as u64, *r);
            }
            for (f, e) in reg.f.iter_mut().zip(&reg.e) {
                f[0] = f64::from_bits(f[0].to_bits() ^ e[0].to_bits());
                f[1] = f64::from_bits(f[1].to_bits() ^ e[1].to_bits());
            }
            for (i, f) in reg.f.iter().enumerate() {
                bytecode::store_u64(sp, sp_addr0 + 16 * i as u64, f[0].to_bits());
                bytecode::store_u64(sp, sp_addr0 + 16 * i as u64 + 8, f[1].to_bits());
            }

            sp_addr0 = 0;
            sp_addr1 = 0;
        }
    }

    fn finalize(&mut self) -> Digest {
        let fingerprint = aes::fingerprint(self.scratchpad.as_slice());
        for (pair, chunk) in self.reg.a.iter_mut().zip(fingerprint.chunks_exact(16)) {
            let mut lo = [0_u8; 8];
            let mut hi = [0_u8; 8];
            lo.copy_from_slice(&chunk[..8]);
            hi.copy_from_slice(&chunk[8..]);
            *pair = [
                f64::from_bits(u64::from_le_bytes(lo)),
                f64::from_bits(u64::from_le_bytes(hi)),
            ];
        }
        fenv::reset_rounding_mode();

        let hash = blake2b_simd::Params::new()
            .hash_length(DIGEST_SIZE)
            .hash(&self.reg.to_bytes());
        let mut digest = [0_u8; DIGEST_SIZE];
        digest.copy_from_slice(hash.as_bytes());
        digest
    }
}

impl core::fmt::Debug for Vm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vm")
            .field("variant", &self.cfg.variant)
            .field("flags", &self.flags)
            .field(
                "mode",
                &match self.binding {
                    Binding::Light(_) => "light",
                    Binding::Full(_) => "full",
                },
            )
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

fn blake_seed(input: &[u8]) -> [u8; SEED_SIZE] {
    let mut seed = [0_u8; SEED_SIZE];
    seed.copy_from_slice(blake2b_simd::blake2b(input).as_bytes());
    seed
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Variant;

    /// A configuration small enough for unit tests: a 256 KiB cache and a
    /// short program chain.
    fn tiny_config() -> Arc<Configuration> {
        let mut cfg = (*Variant::Monero.configuration()).clone();
        cfg.argon_memory = 256;
        cfg.argon_iterations = 1;
        cfg.program_count = 2;
        cfg.program_iterations = 64;
        Arc::new(cfg)
    }

    fn tiny_cache(key: &[u8]) -> Arc<Cache> {
        Arc::new(Cache::new(&tiny_config(), key).unwrap())
    }

    #[test]
    fn hashes_are_deterministic_and_input_sensitive() {
        let cache = tiny_cache(b"vm test key");
        let mut vm = Vm::light(Arc::clone(&cache), Flags::empty()).unwrap();
        let a = vm.hash(b"input one").unwrap();
        let b = vm.hash(b"input one").unwrap();
        let c = vm.hash(b"input two").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hashes_depend_on_the_cache_key() {
        let mut vm1 = Vm::light(tiny_cache(b"key one"), Flags::empty()).unwrap();
        let mut vm2 = Vm::light(tiny_cache(b"key two"), Flags::empty()).unwrap();
        assert_ne!(vm1.hash(b"same input").unwrap(), vm2.hash(b"same input").unwrap());
    }

    #[test]
    fn backends_agree() {
        let cache = tiny_cache(b"backend key");
        let mut soft = Vm::light(Arc::clone(&cache), Flags::empty()).unwrap();
        let mut fast = Vm::light(cache, Flags::PRECOMPILED).unwrap();
        for input in [&b"a"[..], b"", b"a longer input with more bytes"] {
            assert_eq!(soft.hash(input).unwrap(), fast.hash(input).unwrap());
        }
    }

    #[test]
    fn pipeline_matches_one_shot_hashing() {
        let cache = tiny_cache(b"pipeline key");
        let mut oneshot = Vm::light(Arc::clone(&cache), Flags::empty()).unwrap();
        let mut pipelined = Vm::light(cache, Flags::empty()).unwrap();

        let inputs: [&[u8]; 3] = [b"first", b"second", b"third"];
        let expected: Vec<Digest> = inputs.iter().map(|i| oneshot.hash(i).unwrap()).collect();

        pipelined.hash_first(inputs[0]).unwrap();
        let first = pipelined.hash_next(inputs[1]).unwrap();
        let second = pipelined.hash_next(inputs[2]).unwrap();
        let third = pipelined.hash_last().unwrap();
        assert_eq!(vec![first, second, third], expected);
    }

    #[test]
    fn pipeline_state_is_enforced() {
        let cache = tiny_cache(b"state key");
        let mut vm = Vm::light(Arc::clone(&cache), Flags::empty()).unwrap();

        assert!(matches!(vm.hash_next(b"x"), Err(Error::VmIdle)));
        assert!(matches!(vm.hash_last(), Err(Error::VmIdle)));

        vm.hash_first(b"x").unwrap();
        assert!(matches!(vm.hash_first(b"y"), Err(Error::VmBusy)));
        assert!(matches!(vm.hash(b"y"), Err(Error::VmBusy)));
        assert!(matches!(vm.set_cache(cache), Err(Error::VmBusy)));

        vm.hash_last().unwrap();
        assert!(matches!(vm.hash_last(), Err(Error::VmIdle)));
    }

    #[test]
    fn rebinding_swaps_the_key_in_place() {
        let cache1 = tiny_cache(b"generation 1");
        let cache2 = tiny_cache(b"generation 2");
        let mut vm = Vm::light(Arc::clone(&cache1), Flags::empty()).unwrap();
        let h1 = vm.hash(b"block").unwrap();

        vm.set_cache(cache2).unwrap();
        let h2 = vm.hash(b"block").unwrap();
        assert_ne!(h1, h2);

        vm.set_cache(cache1).unwrap();
        assert_eq!(vm.hash(b"block").unwrap(), h1);
    }

    #[test]
    fn mismatched_configurations_are_rejected() {
        let cache = tiny_cache(b"match key");
        let mut vm = Vm::light(cache, Flags::empty()).unwrap();

        let mut other = (*tiny_config()).clone();
        other.program_iterations = 128;
        let other_cache = Arc::new(Cache::new(&Arc::new(other), b"match key").unwrap());
        assert!(vm.set_cache(other_cache).is_err());
    }

    #[test]
    fn full_memory_flag_requires_a_dataset() {
        let cache = tiny_cache(b"flag key");
        assert!(Vm::light(cache, Flags::FULL_MEM).is_err());
    }

    #[test]
    fn register_file_serialises_in_register_order() {
        let mut reg = RegisterFile::default();
        reg.r[0] = 0x0102_0304_0506_0708;
        reg.a[3][1] = f64::from_bits(u64::MAX);
        let bytes = reg.to_bytes();
        assert_eq!(&bytes[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[248..], &[0xff; 8]);
    }
}
