//! Generation and execution of cache-mixing programs.
//!
//! Dataset items are derived from the cache by a chain of generated programs
//! that emulate what an out-of-order CPU can retire in a fixed number of
//! cycles. The generator ([`sched`]) simulates a three-port superscalar
//! pipeline and packs data-dependent instructions until either the port map
//! or the latency budget is exhausted; execution of the result is a plain
//! interpreter over eight 64-bit registers.

pub(crate) mod blake_gen;
mod sched;

pub(crate) use blake_gen::BlakeGenerator;

// =============================================================================
// PROGRAM REPRESENTATION
// =============================================================================

/// One mixing instruction. Immediate-operand forms carry their operand
/// inline; reciprocal multiplications are resolved at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    /// `r[dst] -= r[src]`
    Sub { dst: usize, src: usize },
    /// `r[dst] ^= r[src]`
    Xor { dst: usize, src: usize },
    /// `r[dst] += r[src] << shift`
    AddShift { dst: usize, src: usize, shift: u32 },
    /// `r[dst] *= r[src]`
    Mul { dst: usize, src: usize },
    /// `r[dst] = rotr(r[dst], shift)`
    RotateRight { dst: usize, shift: u32 },
    /// `r[dst] += sign_extend(imm)`
    AddImm { dst: usize, imm: i32 },
    /// `r[dst] ^= sign_extend(imm)`
    XorImm { dst: usize, imm: i32 },
    /// `r[dst] = high64(r[dst] * r[src])` (unsigned)
    MulHigh { dst: usize, src: usize },
    /// `r[dst] = high64(r[dst] * r[src])` (signed)
    SignedMulHigh { dst: usize, src: usize },
    /// `r[dst] *= reciprocal` (fixed-point reciprocal of the original
    /// immediate divisor)
    MulReciprocal { dst: usize, reciprocal: u64 },
}

impl Op {
    pub(crate) const fn dst(self) -> usize {
        match self {
            Self::Sub { dst, .. }
            | Self::Xor { dst, .. }
            | Self::AddShift { dst, .. }
            | Self::Mul { dst, .. }
            | Self::RotateRight { dst, .. }
            | Self::AddImm { dst, .. }
            | Self::XorImm { dst, .. }
            | Self::MulHigh { dst, .. }
            | Self::SignedMulHigh { dst, .. }
            | Self::MulReciprocal { dst, .. } => dst,
        }
    }

    pub(crate) const fn src(self) -> Option<usize> {
        match self {
            Self::Sub { src, .. }
            | Self::Xor { src, .. }
            | Self::AddShift { src, .. }
            | Self::Mul { src, .. }
            | Self::MulHigh { src, .. }
            | Self::SignedMulHigh { src, .. } => Some(src),
            _ => None,
        }
    }
}

/// A generated mixing program with its address register.
#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub(crate) ops: Vec<Op>,
    pub(crate) address_register: usize,
}

impl Program {
    /// Generates the next program from the shared generator stream.
    pub(crate) fn generate(gen: &mut BlakeGenerator, latency: usize) -> Self {
        sched::generate(gen, latency)
    }
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Runs a program over the register bank. All arithmetic wraps.
pub(crate) fn execute(program: &Program, r: &mut [u64; 8]) {
    for op in &program.ops {
        match *op {
            Op::Sub { dst, src } => r[dst] = r[dst].wrapping_sub(r[src]),
            Op::Xor { dst, src } => r[dst] ^= r[src],
            Op::AddShift { dst, src, shift } => {
                r[dst] = r[dst].wrapping_add(r[src] << shift);
            }
            Op::Mul { dst, src } => r[dst] = r[dst].wrapping_mul(r[src]),
            Op::RotateRight { dst, shift } => r[dst] = r[dst].rotate_right(shift),
            Op::AddImm { dst, imm } => r[dst] = r[dst].wrapping_add(imm as u64),
            Op::XorImm { dst, imm } => r[dst] ^= imm as u64,
            Op::MulHigh { dst, src } => {
                r[dst] = ((u128::from(r[dst]) * u128::from(r[src])) >> 64) as u64;
            }
            Op::SignedMulHigh { dst, src } => {
                let product = i128::from(r[dst] as i64) * i128::from(r[src] as i64);
                r[dst] = (product >> 64) as u64;
            }
            Op::MulReciprocal { dst, reciprocal } => {
                r[dst] = r[dst].wrapping_mul(reciprocal);
            }
        }
    }
}

/// Fixed-point reciprocal `floor(2^x / divisor)` scaled so the result uses
/// the full 64 bits, making `r * reciprocal(d)` a division-free stand-in for
/// `r / d`. `divisor` must not be zero or a power of two.
pub(crate) fn reciprocal(divisor: u64) -> u64 {
    debug_assert!(divisor > 2 && !divisor.is_power_of_two());

    let p2exp63 = 1_u64 << 63;
    let mut quotient = p2exp63 / divisor;
    let mut remainder = p2exp63 % divisor;

    let bits = 64 - divisor.leading_zeros();
    for _ in 0..bits {
        if remainder >= divisor - remainder {
            quotient = quotient.wrapping_mul(2).wrapping_add(1);
            remainder = remainder.wrapping_mul(2).wrapping_sub(divisor);
        } else {
            quotient = quotient.wrapping_mul(2);
            remainder = remainder.wrapping_mul(2);
        }
    }
    quotient
}

/// True for immediates that cannot be used as reciprocal divisors.
pub(crate) const fn is_zero_or_power_of_two(value: u32) -> bool {
    value & value.wrapping_sub(1) == 0
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_matches_wide_division() {
        for divisor in [3_u64, 5, 7, 11, 109, 77777, 3_000_000_007, 0xdead_beef] {
            let bits = u64::from(64 - divisor.leading_zeros());
            let expected = ((1_u128 << (63 + bits)) / u128::from(divisor)) as u64;
            assert_eq!(reciprocal(divisor), expected, "divisor {divisor}");
        }
    }

    #[test]
    fn power_of_two_detection() {
        assert!(is_zero_or_power_of_two(0));
        assert!(is_zero_or_power_of_two(1));
        assert!(is_zero_or_power_of_two(64));
        assert!(!is_zero_or_power_of_two(3));
        assert!(!is_zero_or_power_of_two(384));
    }

    #[test]
    fn generation_is_deterministic() {
        let mut a = BlakeGenerator::new(b"prog seed", 0);
        let mut b = BlakeGenerator::new(b"prog seed", 0);
        let pa = Program::generate(&mut a, 170);
        let pb = Program::generate(&mut b, 170);
        assert_eq!(pa.ops, pb.ops);
        assert_eq!(pa.address_register, pb.address_register);
    }

    #[test]
    fn generated_programs_are_well_formed() {
        let mut gen = BlakeGenerator::new(b"wf", 0);
        for _ in 0..8 {
            let program = Program::generate(&mut gen, 170);
            assert!(!program.ops.is_empty());
            // 3 macro-ops per latency cycle plus the final partial slot.
            assert!(program.ops.len() <= 3 * 170 + 2);
            assert!(program.address_register < 8);
            for op in &program.ops {
                assert!(op.dst() < 8);
                if let Some(src) = op.src() {
                    assert!(src < 8);
                }
                if let Op::MulReciprocal { reciprocal, .. } = op {
                    assert!(*reciprocal > 1 << 62);
                }
                if let Op::RotateRight { shift, .. } = op {
                    assert!(*shift > 0 && *shift < 64);
                }
            }
        }
    }

    #[test]
    fn consecutive_programs_differ() {
        let mut gen = BlakeGenerator::new(b"chain", 0);
        let a = Program::generate(&mut gen, 170);
        let b = Program::generate(&mut gen, 170);
        assert_ne!(a.ops, b.ops);
    }

    #[test]
    fn execution_mixes_all_registers() {
        let mut gen = BlakeGenerator::new(b"mix", 3);
        let program = Program::generate(&mut gen, 170);
        let mut regs = [1_u64, 2, 3, 4, 5, 6, 7, 8];
        let before = regs;
        execute(&program, &mut regs);
        let changed = regs.iter().zip(&before).filter(|(a, b)| a != b).count();
        assert!(changed >= 7, "only {changed} registers changed");
    }
}
