//! Instruction decoding and the portable interpreter core.
//!
//! Raw instruction bytes are lowered into a flat bytecode once per program
//! (or once per iteration on the soft backend): opcode bytes are mapped
//! through the variant's frequency table, immediate-only addressing is
//! resolved, reciprocals are precomputed and branch targets are fixed from
//! the register-usage chain. Execution is then a plain match loop over the
//! bytecode.

use crate::config::Configuration;
use crate::kernels::constants::{DYNAMIC_MANTISSA_MASK, REGISTER_COUNT, SCALE_MASK};
use crate::kernels::fenv;
use crate::superscalar::{is_zero_or_power_of_two, reciprocal};
use crate::vm::program::RawInstr;
use crate::vm::RegisterFile;

/// `r5` doubles as the displacement register of the address-shift
/// instruction; only there does the immediate take part.
const DISPLACEMENT_REG: usize = 5;

/// Condition values at and above this make the scratchpad store span L3.
const STORE_L3_CONDITION: u32 = 14;

// =============================================================================
// BYTECODE
// =============================================================================

/// A scratchpad operand address: `(r[base] + imm) & mask`, with `base`
/// absent for immediate-only addressing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemAddr {
    base: Option<usize>,
    imm: u64,
    mask: u64,
}

impl MemAddr {
    fn resolve(&self, r: &[u64; REGISTER_COUNT]) -> u64 {
        let base = match self.base {
            Some(reg) => r[reg],
            None => 0,
        };
        base.wrapping_add(self.imm) & self.mask
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Bc {
    AddShift { dst: usize, src: usize, shift: u32, imm: u64 },
    AddMem { dst: usize, addr: MemAddr },
    SubReg { dst: usize, src: usize },
    SubImm { dst: usize, imm: u64 },
    SubMem { dst: usize, addr: MemAddr },
    MulReg { dst: usize, src: usize },
    MulImm { dst: usize, imm: u64 },
    MulMem { dst: usize, addr: MemAddr },
    MulHighReg { dst: usize, src: usize },
    MulHighMem { dst: usize, addr: MemAddr },
    SMulHighReg { dst: usize, src: usize },
    SMulHighMem { dst: usize, addr: MemAddr },
    MulRcp { dst: usize, multiplier: u64 },
    Neg { dst: usize },
    XorReg { dst: usize, src: usize },
    XorImm { dst: usize, imm: u64 },
    XorMem { dst: usize, addr: MemAddr },
    RorReg { dst: usize, src: usize },
    RorImm { dst: usize, shift: u32 },
    RolReg { dst: usize, src: usize },
    RolImm { dst: usize, shift: u32 },
    Swap { a: usize, b: usize },
    FSwapF { dst: usize },
    FSwapE { dst: usize },
    FAddReg { dst: usize, src: usize },
    FAddMem { dst: usize, addr: MemAddr },
    FSubReg { dst: usize, src: usize },
    FSubMem { dst: usize, addr: MemAddr },
    FScale { dst: usize },
    FMul { dst: usize, src: usize },
    FDiv { dst: usize, addr: MemAddr },
    FSqrt { dst: usize },
    Branch { dst: usize, imm: u64, mask: u64, target: i32 },
    Round { src: usize, shift: u32 },
    Store { dst: usize, src: usize, imm: u64, mask: u64 },
    Nop,
}

/// Cumulative opcode ceilings derived from a frequency table.
struct OpTable {
    ceilings: [u32; 30],
}

impl OpTable {
    fn new(frequencies: &[u32; 30]) -> Self {
        let mut ceilings = [0_u32; 30];
        let mut total = 0;
        for (ceiling, frequency) in ceilings.iter_mut().zip(frequencies.iter().copied()) {
            total += frequency;
            *ceiling = total;
        }
        Self { ceilings }
    }

    fn kind(&self, opcode: u8) -> usize {
        let opcode = u32::from(opcode);
        // The table sums to 256, so the scan always terminates.
        self.ceilings.iter().position(|&c| opcode < c).unwrap_or(29)
    }
}

// =============================================================================
// DECODER
// =============================================================================

fn int_addr(instr: RawInstr, dst: usize, src: usize, cfg: &Configuration) -> MemAddr {
    if src == dst {
        MemAddr {
            base: None,
            imm: instr.imm_sx() & cfg.l3_mask(),
            mask: cfg.l3_mask(),
        }
    } else {
        MemAddr {
            base: Some(src),
            imm: instr.imm_sx(),
            mask: if instr.mode_mem() == 0 {
                cfg.l2_mask()
            } else {
                cfg.l1_mask()
            },
        }
    }
}

fn float_addr(instr: RawInstr, src: usize, cfg: &Configuration) -> MemAddr {
    MemAddr {
        base: Some(src),
        imm: instr.imm_sx(),
        mask: if instr.mode_mem() == 0 {
            cfg.l2_mask()
        } else {
            cfg.l1_mask()
        },
    }
}

/// Lowers a raw instruction stream into `out`.
pub(crate) fn decode(code: &[RawInstr], cfg: &Configuration, out: &mut Vec<Bc>) {
    out.clear();
    out.reserve(code.len());
    let table = OpTable::new(&cfg.weights.table());
    let mut register_usage = [-1_i32; REGISTER_COUNT];

    for (i, &instr) in code.iter().enumerate() {
        let dst = instr.dst as usize % REGISTER_COUNT;
        let src = instr.src as usize % REGISTER_COUNT;
        let fdst = dst % 4;
        let fsrc = src % 4;

        let bc = match table.kind(instr.opcode) {
            0 => {
                register_usage[dst] = i as i32;
                Bc::AddShift {
                    dst,
                    src,
                    shift: instr.mode_shift(),
                    imm: if dst == DISPLACEMENT_REG {
                        instr.imm_sx()
                    } else {
                        0
                    },
                }
            }
            1 => {
                register_usage[dst] = i as i32;
                Bc::AddMem {
                    dst,
                    addr: int_addr(instr, dst, src, cfg),
                }
            }
            2 => {
                register_usage[dst] = i as i32;
                if src == dst {
                    Bc::SubImm {
                        dst,
                        imm: instr.imm_sx(),
                    }
                } else {
                    Bc::SubReg { dst, src }
                }
            }
            3 => {
                register_usage[dst] = i as i32;
                Bc::SubMem {
                    dst,
                    addr: int_addr(instr, dst, src, cfg),
                }
            }
            4 => {
                register_usage[dst] = i as i32;
                if src == dst {
                    Bc::MulImm {
                        dst,
                        imm: instr.imm_sx(),
                    }
                } else {
                    Bc::MulReg { dst, src }
                }
            }
            5 => {
                register_usage[dst] = i as i32;
                Bc::MulMem {
                    dst,
                    addr: int_addr(instr, dst, src, cfg),
                }
            }
            6 => {
                register_usage[dst] = i as i32;
                Bc::MulHighReg { dst, src }
            }
            7 => {
                register_usage[dst] = i as i32;
                Bc::MulHighMem {
                    dst,
                    addr: int_addr(instr, dst, src, cfg),
                }
            }
            8 => {
                register_usage[dst] = i as i32;
                Bc::SMulHighReg { dst, src }
            }
            9 => {
                register_usage[dst] = i as i32;
                Bc::SMulHighMem {
                    dst,
                    addr: int_addr(instr, dst, src, cfg),
                }
            }
            10 => {
                if is_zero_or_power_of_two(instr.imm) {
                    Bc::Nop
                } else {
                    register_usage[dst] = i as i32;
                    Bc::MulRcp {
                        dst,
                        multiplier: reciprocal(u64::from(instr.imm)),
                    }
                }
            }
            11 => {
                register_usage[dst] = i as i32;
                Bc::Neg { dst }
            }
            12 => {
                register_usage[dst] = i as i32;
                if src == dst {
                    Bc::XorImm {
                        dst,
                        imm: instr.imm_sx(),
                    }
                } else {
                    Bc::XorReg { dst, src }
                }
            }
            13 => {
                register_usage[dst] = i as i32;
                Bc::XorMem {
                    dst,
                    addr: int_addr(instr, dst, src, cfg),
                }
            }
            14 => {
                register_usage[dst] = i as i32;
                if src == dst {
                    Bc::RorImm {
                        dst,
                        shift: instr.imm & 63,
                    }
                } else {
                    Bc::RorReg { dst, src }
                }
            }
            15 => {
                register_usage[dst] = i as i32;
                if src == dst {
                    Bc::RolImm {
                        dst,
                        shift: instr.imm & 63,
                    }
                } else {
                    Bc::RolReg { dst, src }
                }
            }
            16 => {
                if src == dst {
                    Bc::Nop
                } else {
                    register_usage[dst] = i as i32;
                    register_usage[src] = i as i32;
                    Bc::Swap { a: dst, b: src }
                }
            }
            17 => {
                if dst < 4 {
                    Bc::FSwapF { dst }
                } else {
                    Bc::FSwapE { dst: dst - 4 }
                }
            }
            18 => Bc::FAddReg {
                dst: fdst,
                src: fsrc,
            },
            19 => Bc::FAddMem {
                dst: fdst,
                addr: float_addr(instr, src, cfg),
            },
            20 => Bc::FSubReg {
                dst: fdst,
                src: fsrc,
            },
            21 => Bc::FSubMem {
                dst: fdst,
                addr: float_addr(instr, src, cfg),
            },
            22 => Bc::FScale { dst: fdst },
            23 => Bc::FMul {
                dst: fdst,
                src: fsrc,
            },
            24 => Bc::FDiv {
                dst: fdst,
                addr: float_addr(instr, src, cfg),
            },
            25 => Bc::FSqrt { dst: fdst },
            26 => {
                let shift = instr.mode_cond() + cfg.jump_offset;
                let mut imm = instr.imm_sx() | (1 << shift);
                if shift > 0 {
                    imm &= !(1 << (shift - 1));
                }
                let target = register_usage[dst];
                // A taken branch re-enters after the last write to `dst`;
                // everything in between is live again.
                for usage in &mut register_usage {
                    *usage = i as i32;
                }
                Bc::Branch {
                    dst,
                    imm,
                    mask: cfg.condition_mask() << shift,
                    target,
                }
            }
            27 => Bc::Round {
                src,
                shift: instr.imm & 63,
            },
            28 => Bc::Store {
                dst,
                src,
                imm: instr.imm_sx(),
                mask: if instr.mode_cond() < STORE_L3_CONDITION {
                    if instr.mode_mem() == 0 {
                        cfg.l2_mask()
                    } else {
                        cfg.l1_mask()
                    }
                } else {
                    cfg.l3_mask()
                },
            },
            _ => Bc::Nop,
        };
        out.push(bc);
    }
}

// =============================================================================
// SCRATCHPAD ACCESS
// =============================================================================

pub(crate) fn load_u64(scratchpad: &[u8], addr: u64) -> u64 {
    let addr = addr as usize;
    let mut le = [0_u8; 8];
    le.copy_from_slice(&scratchpad[addr..addr + 8]);
    u64::from_le_bytes(le)
}

pub(crate) fn store_u64(scratchpad: &mut [u8], addr: u64, value: u64) {
    let addr = addr as usize;
    scratchpad[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
}

/// Loads two packed 32-bit integers and widens them to doubles.
pub(crate) fn load_f64_pair(scratchpad: &[u8], addr: u64) -> [f64; 2] {
    let addr = addr as usize;
    let mut lo = [0_u8; 4];
    let mut hi = [0_u8; 4];
    lo.copy_from_slice(&scratchpad[addr..addr + 4]);
    hi.copy_from_slice(&scratchpad[addr + 4..addr + 8]);
    [
        f64::from(i32::from_le_bytes(lo)),
        f64::from(i32::from_le_bytes(hi)),
    ]
}

/// Clamps a loaded operand into the group-E value range: dynamic mantissa
/// bits are kept, exponent and sign come from the per-program mask.
pub(crate) fn mask_e(value: [f64; 2], e_mask: [u64; 2]) -> [f64; 2] {
    [
        f64::from_bits((value[0].to_bits() & DYNAMIC_MANTISSA_MASK) | e_mask[0]),
        f64::from_bits((value[1].to_bits() & DYNAMIC_MANTISSA_MASK) | e_mask[1]),
    ]
}

// =============================================================================
// INTERPRETER
// =============================================================================

/// Runs one program iteration over the register file and scratchpad.
pub(crate) fn execute(
    code: &[Bc],
    reg: &mut RegisterFile,
    scratchpad: &mut [u8],
    e_mask: [u64; 2],
) {
    let mut pc = 0_i64;
    while (pc as usize) < code.len() {
        match code[pc as usize] {
            Bc::AddShift {
                dst,
                src,
                shift,
                imm,
            } => {
                reg.r[dst] = reg.r[dst].wrapping_add((reg.r[src] << shift).wrapping_add(imm));
            }
            Bc::AddMem { dst, addr } => {
                reg.r[dst] = reg.r[dst].wrapping_add(load_u64(scratchpad, addr.resolve(&reg.r)));
            }
            Bc::SubReg { dst, src } => {
                reg.r[dst] = reg.r[dst].wrapping_sub(reg.r[src]);
            }
            Bc::SubImm { dst, imm } => {
                reg.r[dst] = reg.r[dst].wrapping_sub(imm);
            }
            Bc::SubMem { dst, addr } => {
                reg.r[dst] = reg.r[dst].wrapping_sub(load_u64(scratchpad, addr.resolve(&reg.r)));
            }
            Bc::MulReg { dst, src } => {
                reg.r[dst] = reg.r[dst].wrapping_mul(reg.r[src]);
            }
            Bc::MulImm { dst, imm } => {
                reg.r[dst] = reg.r[dst].wrapping_mul(imm);
            }
            Bc::MulMem { dst, addr } => {
                reg.r[dst] = reg.r[dst].wrapping_mul(load_u64(scratchpad, addr.resolve(&reg.r)));
            }
            Bc::MulHighReg { dst, src } => {
                reg.r[dst] = mul_high(reg.r[dst], reg.r[src]);
            }
            Bc::MulHighMem { dst, addr } => {
                reg.r[dst] = mul_high(reg.r[dst], load_u64(scratchpad, addr.resolve(&reg.r)));
            }
            Bc::SMulHighReg { dst, src } => {
                reg.r[dst] = smul_high(reg.r[dst], reg.r[src]);
            }
            Bc::SMulHighMem { dst, addr } => {
                reg.r[dst] = smul_high(reg.r[dst], load_u64(scratchpad, addr.resolve(&reg.r)));
            }
            Bc::MulRcp { dst, multiplier } => {
                reg.r[dst] = reg.r[dst].wrapping_mul(multiplier);
            }
            Bc::Neg { dst } => {
                reg.r[dst] = reg.r[dst].wrapping_neg();
            }
            Bc::XorReg { dst, src } => {
                reg.r[dst] ^= reg.r[src];
            }
            Bc::XorImm { dst, imm } => {
                reg.r[dst] ^= imm;
            }
            Bc::XorMem { dst, addr } => {
                reg.r[dst] ^= load_u64(scratchpad, addr.resolve(&reg.r));
            }
            Bc::RorReg { dst, src } => {
                reg.r[dst] = reg.r[dst].rotate_right((reg.r[src] & 63) as u32);
            }
            Bc::RorImm { dst, shift } => {
                reg.r[dst] = reg.r[dst].rotate_right(shift);
            }
            Bc::RolReg { dst, src } => {
                reg.r[dst] = reg.r[dst].rotate_left((reg.r[src] & 63) as u32);
            }
            Bc::RolImm { dst, shift } => {
                reg.r[dst] = reg.r[dst].rotate_left(shift);
            }
            Bc::Swap { a, b } => {
                reg.r.swap(a, b);
            }
            Bc::FSwapF { dst } => {
                reg.f[dst] = [reg.f[dst][1], reg.f[dst][0]];
            }
            Bc::FSwapE { dst } => {
                reg.e[dst] = [reg.e[dst][1], reg.e[dst][0]];
            }
            Bc::FAddReg { dst, src } => {
                reg.f[dst][0] += reg.a[src][0];
                reg.f[dst][1] += reg.a[src][1];
            }
            Bc::FAddMem { dst, addr } => {
                let m = load_f64_pair(scratchpad, addr.resolve(&reg.r));
                reg.f[dst][0] += m[0];
                reg.f[dst][1] += m[1];
            }
            Bc::FSubReg { dst, src } => {
                reg.f[dst][0] -= reg.a[src][0];
                reg.f[dst][1] -= reg.a[src][1];
            }
            Bc::FSubMem { dst, addr } => {
                let m = load_f64_pair(scratchpad, addr.resolve(&reg.r));
                reg.f[dst][0] -= m[0];
                reg.f[dst][1] -= m[1];
            }
            Bc::FScale { dst } => {
                reg.f[dst][0] = f64::from_bits(reg.f[dst][0].to_bits() ^ SCALE_MASK);
                reg.f[dst][1] = f64::from_bits(reg.f[dst][1].to_bits() ^ SCALE_MASK);
            }
            Bc::FMul { dst, src } => {
                reg.e[dst][0] *= reg.a[src][0];
                reg.e[dst][1] *= reg.a[src][1];
            }
            Bc::FDiv { dst, addr } => {
                let m = mask_e(load_f64_pair(scratchpad, addr.resolve(&reg.r)), e_mask);
                reg.e[dst][0] /= m[0];
                reg.e[dst][1] /= m[1];
            }
            Bc::FSqrt { dst } => {
                reg.e[dst][0] = reg.e[dst][0].sqrt();
                reg.e[dst][1] = reg.e[dst][1].sqrt();
            }
            Bc::Branch {
                dst,
                imm,
                mask,
                target,
            } => {
                reg.r[dst] = reg.r[dst].wrapping_add(imm);
                if reg.r[dst] & mask == 0 {
                    pc = i64::from(target);
                }
            }
            Bc::Round { src, shift } => {
                fenv::set_rounding_mode((reg.r[src].rotate_right(shift) & 3) as u32);
            }
            Bc::Store { dst, src, imm, mask } => {
                store_u64(scratchpad, reg.r[dst].wrapping_add(imm) & mask, reg.r[src]);
            }
            Bc::Nop => {}
        }
        pc += 1;
    }
}

fn mul_high(a: u64, b: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) >> 64) as u64
}

fn smul_high(a: u64, b: u64) -> u64 {
    ((i128::from(a as i64) * i128::from(b as i64)) >> 64) as u64
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variant;

    fn blank_registers() -> RegisterFile {
        RegisterFile::default()
    }

    #[test]
    fn opcode_table_covers_all_bytes() {
        let cfg = Variant::Monero.configuration();
        let table = OpTable::new(&cfg.weights.table());
        assert_eq!(table.kind(0), 0);
        // The trailing zero-weight NOP never wins a byte; 255 decodes to the
        // last weighted op, the store.
        assert_eq!(table.kind(255), 28);
        for opcode in 0..=255_u8 {
            assert!(table.kind(opcode) < 30);
        }
    }

    #[test]
    fn displacement_register_gets_the_immediate() {
        let cfg = Variant::Monero.configuration();
        // Opcode 0 is the add-shift instruction under the default weights.
        let to_r5 = RawInstr {
            opcode: 0,
            dst: 5,
            src: 1,
            mode: 0,
            imm: 100,
        };
        let to_r0 = RawInstr { dst: 0, ..to_r5 };

        let mut code = Vec::new();
        decode(&[to_r5, to_r0], &cfg, &mut code);
        match (code[0], code[1]) {
            (Bc::AddShift { imm: imm5, .. }, Bc::AddShift { imm: imm0, .. }) => {
                assert_eq!(imm5, 100);
                assert_eq!(imm0, 0);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn branch_reenters_after_the_last_write() {
        // A taken branch with target 0 resumes at index 1, so the counter
        // at index 1 counts the loop passes.
        let code = [
            Bc::Nop,
            Bc::AddShift {
                dst: 2,
                src: 6,
                shift: 0,
                imm: 1,
            },
            Bc::Branch {
                dst: 1,
                imm: 1 << 8,
                mask: 0xff00,
                target: 0,
            },
        ];
        let mut reg = blank_registers();
        reg.r[1] = 0xff00;
        let mut scratchpad = vec![0_u8; 64];
        execute(&code, &mut reg, &mut scratchpad, [0, 0]);
        // First pass carries bits 8..16 to zero (taken); second pass leaves
        // bit 8 set (not taken).
        assert_eq!(reg.r[1], 0x10100);
        assert_eq!(reg.r[2], 2);
    }

    #[test]
    fn high_multiplies_match_wide_arithmetic() {
        assert_eq!(mul_high(u64::MAX, u64::MAX), u64::MAX - 1);
        assert_eq!(smul_high(u64::MAX, u64::MAX), 0); // (-1) * (-1)
        assert_eq!(mul_high(1 << 63, 2), 1);
        assert_eq!(smul_high(1 << 63, 2), u64::MAX); // i64::MIN * 2
    }

    #[test]
    fn immediate_only_addressing_uses_the_wide_mask() {
        let cfg = Variant::Monero.configuration();
        let same = RawInstr {
            opcode: 16, // first add-from-memory opcode
            dst: 3,
            src: 3,
            mode: 0,
            imm: 0xffff_ffff,
        };
        let mut code = Vec::new();
        decode(&[same], &cfg, &mut code);
        match code[0] {
            Bc::AddMem { addr, .. } => {
                assert!(addr.base.is_none());
                assert_eq!(addr.mask, cfg.l3_mask());
                assert_eq!(addr.imm & 7, 0); // stays 8-byte aligned
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn swap_marks_both_registers_for_branch_targets() {
        let cfg = Variant::Monero.configuration();
        // swap r1, r2 then branch on r2: the branch target must be the swap.
        let swap = RawInstr {
            opcode: 116, // first swap opcode under the default weights
            dst: 1,
            src: 2,
            mode: 0,
            imm: 0,
        };
        let branch = RawInstr {
            opcode: 214, // first branch opcode
            dst: 2,
            src: 0,
            mode: 0,
            imm: 0,
        };
        let mut code = Vec::new();
        decode(&[swap, branch], &cfg, &mut code);
        match (code[0], code[1]) {
            (Bc::Swap { .. }, Bc::Branch { target, .. }) => assert_eq!(target, 0),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn store_condition_selects_the_l3_span() {
        let cfg = Variant::Monero.configuration();
        let store_l2 = RawInstr {
            opcode: 240, // first store opcode
            dst: 0,
            src: 1,
            mode: 0,
            imm: 8,
        };
        let store_l3 = RawInstr {
            mode: 14 << 4,
            ..store_l2
        };
        let mut code = Vec::new();
        decode(&[store_l2, store_l3], &cfg, &mut code);
        match (code[0], code[1]) {
            (Bc::Store { mask: m2, .. }, Bc::Store { mask: m3, .. }) => {
                assert_eq!(m2, cfg.l2_mask());
                assert_eq!(m3, cfg.l3_mask());
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
