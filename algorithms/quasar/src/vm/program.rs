//! Generated program buffers and per-program entropy.
//!
//! Each chained program is expanded from a 64-byte seed: 128 bytes of
//! entropy followed by eight raw bytes per instruction. The entropy fixes
//! the read-only `a` registers, the memory registers and the group-E operand
//! masks for the whole program execution.

use std::sync::Arc;

use crate::config::Configuration;
use crate::kernels::aes;
use crate::kernels::constants::{
    CACHE_LINE_SIZE, CONST_EXPONENT_BITS, EXPONENT_BIAS, MANTISSA_MASK, MANTISSA_SIZE,
    SEED_SIZE, STATIC_EXPONENT_BITS,
};

/// Raw instruction bytes: opcode, destination, source, mode and a 32-bit
/// immediate.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawInstr {
    pub opcode: u8,
    pub dst: u8,
    pub src: u8,
    pub mode: u8,
    pub imm: u32,
}

impl RawInstr {
    /// Address-mode bits: zero selects the L2 span, non-zero L1.
    pub(crate) const fn mode_mem(self) -> u8 {
        self.mode & 3
    }

    /// Shift amount of the address-shift instruction.
    pub(crate) const fn mode_shift(self) -> u32 {
        (self.mode >> 2) as u32 & 3
    }

    /// Branch-condition selector.
    pub(crate) const fn mode_cond(self) -> u32 {
        (self.mode >> 4) as u32
    }

    /// The immediate sign-extended to 64 bits.
    pub(crate) const fn imm_sx(self) -> u64 {
        self.imm as i32 as u64
    }
}

/// One generated program: entropy words plus raw instructions.
pub(crate) struct Program {
    pub(crate) entropy: [u64; 16],
    pub(crate) code: Vec<RawInstr>,
    buffer: Vec<u8>,
}

impl Program {
    pub(crate) fn new(cfg: &Arc<Configuration>) -> Self {
        Self {
            entropy: [0; 16],
            code: vec![RawInstr::default(); cfg.program_size as usize],
            buffer: vec![0; cfg.program_buffer_size()],
        }
    }

    /// Expands `seed` into this program's entropy and instruction stream.
    pub(crate) fn generate(&mut self, seed: &[u8; SEED_SIZE], cfg: &Configuration) {
        aes::fill_4r(seed, &cfg.program_keys, &mut self.buffer);

        for (word, chunk) in self.entropy.iter_mut().zip(self.buffer.chunks_exact(8)) {
            let mut le = [0_u8; 8];
            le.copy_from_slice(chunk);
            *word = u64::from_le_bytes(le);
        }
        for (instr, chunk) in self
            .code
            .iter_mut()
            .zip(self.buffer[128..].chunks_exact(8))
        {
            let mut le = [0_u8; 4];
            le.copy_from_slice(&chunk[4..8]);
            *instr = RawInstr {
                opcode: chunk[0],
                dst: chunk[1],
                src: chunk[2],
                mode: chunk[3],
                imm: u32::from_le_bytes(le),
            };
        }
    }
}

// =============================================================================
// PROGRAM CONTEXT
// =============================================================================

/// Per-program execution context parsed from the entropy words.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgramContext {
    /// Read-only float registers.
    pub a: [[f64; 2]; 4],
    /// Dataset address register (aligned).
    pub ma: u32,
    /// Dataset prefetch register.
    pub mx: u32,
    /// Integer registers mixed into the scratchpad/dataset addresses.
    pub read_reg: [usize; 4],
    /// Byte offset of this program's dataset window.
    pub dataset_offset: u64,
    /// Group-E exponent/sign masks per lane.
    pub e_mask: [u64; 2],
}

impl ProgramContext {
    pub(crate) fn new(entropy: &[u64; 16], cfg: &Configuration) -> Self {
        let a = [
            [
                small_positive_float(entropy[0]),
                small_positive_float(entropy[1]),
            ],
            [
                small_positive_float(entropy[2]),
                small_positive_float(entropy[3]),
            ],
            [
                small_positive_float(entropy[4]),
                small_positive_float(entropy[5]),
            ],
            [
                small_positive_float(entropy[6]),
                small_positive_float(entropy[7]),
            ],
        ];

        let address_registers = entropy[12];
        let read_reg = [
            (address_registers & 1) as usize,
            2 + ((address_registers >> 1) & 1) as usize,
            4 + ((address_registers >> 2) & 1) as usize,
            6 + ((address_registers >> 3) & 1) as usize,
        ];

        Self {
            a,
            ma: (entropy[8] & cfg.dataset_align_mask()) as u32,
            mx: entropy[10] as u32,
            read_reg,
            dataset_offset: entropy[13] % (cfg.dataset_extra_items() + 1)
                * CACHE_LINE_SIZE as u64,
            e_mask: [float_mask(entropy[14]), float_mask(entropy[15])],
        }
    }
}

/// Builds a small positive float in [1, 2^33) from an entropy word: the top
/// five bits select the exponent, the low bits the mantissa.
fn small_positive_float(entropy: u64) -> f64 {
    let exponent = ((entropy >> 59) + EXPONENT_BIAS) & 0x7ff;
    f64::from_bits((exponent << MANTISSA_SIZE) | (entropy & MANTISSA_MASK))
}

/// Builds the group-E operand mask: 22 mantissa bits of entropy plus a
/// static exponent in a range that keeps group-E values large and positive.
fn float_mask(entropy: u64) -> u64 {
    let exponent =
        CONST_EXPONENT_BITS | ((entropy >> (64 - STATIC_EXPONENT_BITS)) << STATIC_EXPONENT_BITS);
    (entropy & ((1 << 22) - 1)) | (exponent << MANTISSA_SIZE)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variant;

    #[test]
    fn entropy_floats_are_small_and_positive() {
        for entropy in [0_u64, 1, u64::MAX, 0x8000_0000_0000_0000, 0xdead_beef_cafe_f00d] {
            let value = small_positive_float(entropy);
            assert!(value >= 1.0);
            assert!(value < (2.0_f64).powi(33));
        }
    }

    #[test]
    fn float_masks_pin_the_exponent() {
        for entropy in [0_u64, u64::MAX, 0x1234_5678_9abc_def0] {
            let mask = float_mask(entropy);
            let exponent = (mask >> 52) & 0x7ff;
            assert!(exponent >= 0x300);
            assert!(exponent <= 0x3f0);
            // Only the low 22 mantissa bits may be set.
            assert_eq!(mask & MANTISSA_MASK & !((1 << 22) - 1), 0);
        }
    }

    #[test]
    fn program_generation_is_deterministic() {
        let cfg = Variant::Monero.configuration();
        let seed = [9_u8; SEED_SIZE];
        let mut a = Program::new(&cfg);
        let mut b = Program::new(&cfg);
        a.generate(&seed, &cfg);
        b.generate(&seed, &cfg);
        assert_eq!(a.entropy, b.entropy);
        assert_eq!(a.code.len(), 256);
        for (x, y) in a.code.iter().zip(&b.code) {
            assert_eq!((x.opcode, x.dst, x.src, x.mode, x.imm), (y.opcode, y.dst, y.src, y.mode, y.imm));
        }
    }

    #[test]
    fn read_registers_stay_in_their_pairs() {
        let cfg = Variant::Monero.configuration();
        for seed_byte in 0..32_u8 {
            let mut program = Program::new(&cfg);
            program.generate(&[seed_byte; SEED_SIZE], &cfg);
            let ctx = ProgramContext::new(&program.entropy, &cfg);
            assert!(ctx.read_reg[0] < 2);
            assert!((2..4).contains(&ctx.read_reg[1]));
            assert!((4..6).contains(&ctx.read_reg[2]));
            assert!((6..8).contains(&ctx.read_reg[3]));
            assert_eq!(ctx.ma % CACHE_LINE_SIZE as u32, 0);
            assert_eq!(ctx.dataset_offset % CACHE_LINE_SIZE as u64, 0);
        }
    }
}
