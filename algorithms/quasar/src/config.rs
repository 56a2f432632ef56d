//! Parameter sets and derived constants.
//!
//! A [`Configuration`] fixes every tunable of the hashing scheme: Argon2
//! cache parameters, scratchpad geometry, program shape and the instruction
//! weight table. Configurations are immutable once built; components capture
//! them behind an `Arc` so independent engines can run different parameter
//! sets side by side in one process.

use std::sync::Arc;

use crate::kernels::constants::{CACHE_LINE_SIZE, FILL_4R_KEYS, FILL_4R_KEYS_LEGACY};
use crate::types::{Error, Result};

// =============================================================================
// VARIANTS
// =============================================================================

/// Named parameter sets. `Monero` is the reference set; the others are the
/// forked chains' published deviations from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    /// Reference parameters (2 GiB dataset, 256 MiB cache).
    #[default]
    Monero,
    /// Halved scratchpad, doubled program count, legacy generator keys.
    Wownero,
    /// Halved cache, single Argon2 pass and a small scratchpad.
    Arqma,
    /// Two Argon2 lanes and longer programs.
    Graft,
    /// Reference parameters with a distinct cache salt.
    Safex,
    /// Reference parameters with a distinct cache salt.
    Yada,
}

impl Variant {
    /// All supported variants, in ABI order.
    pub const ALL: [Self; 6] = [
        Self::Monero,
        Self::Wownero,
        Self::Arqma,
        Self::Graft,
        Self::Safex,
        Self::Yada,
    ];

    /// Stable lower-case name, also accepted by [`FromStr`](core::str::FromStr).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Monero => "monero",
            Self::Wownero => "wownero",
            Self::Arqma => "arqma",
            Self::Graft => "graft",
            Self::Safex => "safex",
            Self::Yada => "yada",
        }
    }

    /// Builds the full parameter set for this variant.
    #[must_use]
    pub fn configuration(self) -> Arc<Configuration> {
        let base = Configuration::base(self);
        let cfg = match self {
            Self::Monero => base,
            Self::Wownero => Configuration {
                argon_salt: b"RandomWOW\x01",
                program_iterations: 1024,
                program_count: 16,
                scratchpad_l2: 131_072,
                scratchpad_l3: 1_048_576,
                program_keys: FILL_4R_KEYS_LEGACY,
                weights: Weights {
                    iadd_rs: 25,
                    iror_r: 10,
                    irol_r: 0,
                    cbranch: 16,
                    ..Weights::default()
                },
                ..base
            },
            Self::Arqma => Configuration {
                argon_memory: 131_072,
                argon_iterations: 1,
                argon_salt: b"RandomARQ\x01",
                program_iterations: 1024,
                program_count: 4,
                scratchpad_l2: 131_072,
                scratchpad_l3: 262_144,
                ..base
            },
            Self::Graft => Configuration {
                argon_lanes: 2,
                argon_salt: b"RandomGRAFT\x01",
                program_size: 280,
                weights: Weights {
                    iror_r: 7,
                    irol_r: 3,
                    ..Weights::default()
                },
                ..base
            },
            Self::Safex => Configuration {
                argon_salt: b"RandomSFX\x01",
                ..base
            },
            Self::Yada => Configuration {
                argon_salt: b"RandomXYadaCoin\x03",
                ..base
            },
        };
        debug_assert!(cfg.validate().is_ok());
        Arc::new(cfg)
    }
}

impl core::fmt::Display for Variant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or(Error::Config("unknown variant name"))
    }
}

// =============================================================================
// INSTRUCTION WEIGHTS
// =============================================================================

/// Per-instruction selection weights. The opcode byte of a generated
/// instruction is mapped to the instruction whose cumulative weight range
/// contains it, so the weights must sum to exactly 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Weights {
    pub iadd_rs: u32,
    pub iadd_m: u32,
    pub isub_r: u32,
    pub isub_m: u32,
    pub imul_r: u32,
    pub imul_m: u32,
    pub imulh_r: u32,
    pub imulh_m: u32,
    pub ismulh_r: u32,
    pub ismulh_m: u32,
    pub imul_rcp: u32,
    pub ineg_r: u32,
    pub ixor_r: u32,
    pub ixor_m: u32,
    pub iror_r: u32,
    pub irol_r: u32,
    pub iswap_r: u32,
    pub fswap_r: u32,
    pub fadd_r: u32,
    pub fadd_m: u32,
    pub fsub_r: u32,
    pub fsub_m: u32,
    pub fscal_r: u32,
    pub fmul_r: u32,
    pub fdiv_m: u32,
    pub fsqrt_r: u32,
    pub cbranch: u32,
    pub cfround: u32,
    pub istore: u32,
    pub nop: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            iadd_rs: 16,
            iadd_m: 7,
            isub_r: 16,
            isub_m: 7,
            imul_r: 16,
            imul_m: 4,
            imulh_r: 4,
            imulh_m: 1,
            ismulh_r: 4,
            ismulh_m: 1,
            imul_rcp: 8,
            ineg_r: 2,
            ixor_r: 15,
            ixor_m: 5,
            iror_r: 8,
            irol_r: 2,
            iswap_r: 4,
            fswap_r: 4,
            fadd_r: 16,
            fadd_m: 5,
            fsub_r: 16,
            fsub_m: 5,
            fscal_r: 6,
            fmul_r: 32,
            fdiv_m: 4,
            fsqrt_r: 6,
            cbranch: 25,
            cfround: 1,
            istore: 16,
            nop: 0,
        }
    }
}

impl Weights {
    /// Weights in canonical decode order.
    #[must_use]
    pub(crate) const fn table(&self) -> [u32; 30] {
        [
            self.iadd_rs,
            self.iadd_m,
            self.isub_r,
            self.isub_m,
            self.imul_r,
            self.imul_m,
            self.imulh_r,
            self.imulh_m,
            self.ismulh_r,
            self.ismulh_m,
            self.imul_rcp,
            self.ineg_r,
            self.ixor_r,
            self.ixor_m,
            self.iror_r,
            self.irol_r,
            self.iswap_r,
            self.fswap_r,
            self.fadd_r,
            self.fadd_m,
            self.fsub_r,
            self.fsub_m,
            self.fscal_r,
            self.fmul_r,
            self.fdiv_m,
            self.fsqrt_r,
            self.cbranch,
            self.cfround,
            self.istore,
            self.nop,
        ]
    }

    /// Sum of all weights; must be 256 for a valid configuration.
    #[must_use]
    pub fn sum(&self) -> u32 {
        self.table().iter().sum()
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// A complete, immutable parameter set.
///
/// Build one through [`Variant::configuration`] or customise the fields and
/// run [`Configuration::validate`] before handing it to a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// The variant this configuration was derived from.
    pub variant: Variant,
    /// Argon2d memory in KiB (one block each). Must be a power of two.
    pub argon_memory: u32,
    /// Argon2d passes over the cache.
    pub argon_iterations: u32,
    /// Argon2d parallel lanes.
    pub argon_lanes: u32,
    /// Argon2d salt; also versions the cache contents.
    pub argon_salt: &'static [u8],
    /// Cache accesses per dataset item, and the number of mixing programs.
    pub cache_accesses: usize,
    /// Target latency bound of the mixing-program scheduler, in cycles.
    pub superscalar_latency: usize,
    /// Dataset size addressable by cache-line-aligned reads.
    pub dataset_base_size: u64,
    /// Extra dataset bytes addressed via the per-program item offset.
    pub dataset_extra_size: u64,
    /// Scratchpad level sizes in bytes; powers of two, L1 <= L2 <= L3.
    pub scratchpad_l1: u32,
    /// Level 2 size.
    pub scratchpad_l2: u32,
    /// Level 3 size (the whole scratchpad).
    pub scratchpad_l3: u32,
    /// Instructions per generated program. Must be a multiple of 8.
    pub program_size: u32,
    /// Loop iterations per program execution.
    pub program_iterations: u32,
    /// Chained programs per hash.
    pub program_count: u32,
    /// Branch condition width in bits.
    pub jump_bits: u32,
    /// Bit offset of the branch condition within the register.
    pub jump_offset: u32,
    /// Instruction selection weights.
    pub weights: Weights,
    /// Round keys of the program generator.
    pub program_keys: [[u8; 16]; 8],
}

impl Configuration {
    fn base(variant: Variant) -> Self {
        Self {
            variant,
            argon_memory: 262_144,
            argon_iterations: 3,
            argon_lanes: 1,
            argon_salt: b"RandomX\x03",
            cache_accesses: 8,
            superscalar_latency: 170,
            dataset_base_size: 2_147_483_648,
            dataset_extra_size: 33_554_368,
            scratchpad_l1: 16_384,
            scratchpad_l2: 262_144,
            scratchpad_l3: 2_097_152,
            program_size: 256,
            program_iterations: 2048,
            program_count: 8,
            jump_bits: 8,
            jump_offset: 8,
            weights: Weights::default(),
            program_keys: FILL_4R_KEYS,
        }
    }

    /// Checks every structural invariant the components rely on.
    pub fn validate(&self) -> Result<()> {
        if !self.argon_memory.is_power_of_two() {
            return Err(Error::Config("cache size must be a power of two"));
        }
        if self.argon_iterations == 0 {
            return Err(Error::Config("at least one Argon2 pass is required"));
        }
        if self.argon_lanes == 0 {
            return Err(Error::Config("at least one Argon2 lane is required"));
        }
        if self.argon_salt.len() < 8 {
            return Err(Error::Config("salt must be at least 8 bytes"));
        }
        if self.cache_accesses < 2 {
            return Err(Error::Config("at least two cache accesses are required"));
        }
        if self.superscalar_latency == 0 || self.superscalar_latency > 10_000 {
            return Err(Error::Config("scheduler latency out of range"));
        }
        for size in [self.scratchpad_l1, self.scratchpad_l2, self.scratchpad_l3] {
            if !size.is_power_of_two() || size < CACHE_LINE_SIZE as u32 {
                return Err(Error::Config("scratchpad sizes must be powers of two"));
            }
        }
        if self.scratchpad_l1 > self.scratchpad_l2 || self.scratchpad_l2 > self.scratchpad_l3 {
            return Err(Error::Config("scratchpad levels must be nested"));
        }
        if self.program_size == 0 || self.program_size % 8 != 0 {
            return Err(Error::Config("program size must be a non-zero multiple of 8"));
        }
        if self.program_iterations == 0 {
            return Err(Error::Config("at least one program iteration is required"));
        }
        if self.program_count == 0 {
            return Err(Error::Config("at least one chained program is required"));
        }
        if !self.dataset_base_size.is_power_of_two()
            || self.dataset_base_size < CACHE_LINE_SIZE as u64
        {
            return Err(Error::Config("dataset base size must be a power of two"));
        }
        if self.dataset_extra_size % CACHE_LINE_SIZE as u64 != 0 {
            return Err(Error::Config("dataset extra size must be line-aligned"));
        }
        if u64::from(self.argon_memory) * 1024 > self.dataset_base_size {
            return Err(Error::Config("cache must not be larger than the dataset"));
        }
        if self.jump_bits == 0 || self.jump_bits + self.jump_offset > 16 {
            return Err(Error::Config("branch condition bits out of range"));
        }
        if self.weights.sum() != 256 {
            return Err(Error::Config("instruction weights must sum to 256"));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Derived constants
    // -------------------------------------------------------------------------

    /// Cache size in bytes.
    #[must_use]
    pub const fn cache_size(&self) -> usize {
        self.argon_memory as usize * 1024
    }

    /// Number of 64-byte lines in the cache.
    #[must_use]
    pub const fn cache_line_count(&self) -> u64 {
        (self.cache_size() / CACHE_LINE_SIZE) as u64
    }

    /// Total dataset size in bytes.
    #[must_use]
    pub const fn dataset_size(&self) -> u64 {
        self.dataset_base_size + self.dataset_extra_size
    }

    /// Number of 64-byte items in the dataset.
    #[must_use]
    pub const fn dataset_item_count(&self) -> u64 {
        self.dataset_size() / CACHE_LINE_SIZE as u64
    }

    /// Number of items beyond the base (power-of-two) region.
    #[must_use]
    pub const fn dataset_extra_items(&self) -> u64 {
        self.dataset_extra_size / CACHE_LINE_SIZE as u64
    }

    /// Mask aligning a dataset offset to a cache line within the base region.
    #[must_use]
    pub const fn dataset_align_mask(&self) -> u64 {
        (self.dataset_base_size - 1) & !(CACHE_LINE_SIZE as u64 - 1)
    }

    /// Mask for 8-byte-aligned L1 scratchpad offsets.
    #[must_use]
    pub const fn l1_mask(&self) -> u64 {
        (self.scratchpad_l1 as u64 / 8 - 1) * 8
    }

    /// Mask for 8-byte-aligned L2 scratchpad offsets.
    #[must_use]
    pub const fn l2_mask(&self) -> u64 {
        (self.scratchpad_l2 as u64 / 8 - 1) * 8
    }

    /// Mask for 8-byte-aligned L3 scratchpad offsets.
    #[must_use]
    pub const fn l3_mask(&self) -> u64 {
        (self.scratchpad_l3 as u64 / 8 - 1) * 8
    }

    /// Mask for 64-byte-aligned L3 scratchpad offsets.
    #[must_use]
    pub const fn l3_mask_64(&self) -> u64 {
        (self.scratchpad_l3 as u64 / CACHE_LINE_SIZE as u64 - 1) * CACHE_LINE_SIZE as u64
    }

    /// Mask extracting the branch condition bits (before shifting).
    #[must_use]
    pub const fn condition_mask(&self) -> u64 {
        (1 << self.jump_bits) - 1
    }

    /// Bytes of generator output consumed per program: 128 bytes of entropy
    /// plus 8 bytes per instruction.
    #[must_use]
    pub const fn program_buffer_size(&self) -> usize {
        128 + self.program_size as usize * 8
    }
}

// =============================================================================
// TESTS
// =============================================================================
