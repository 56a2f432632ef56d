//! Fixed constants of the hashing scheme: AES round keys, generator seeds and
//! the dataset mixing sequence.
//!
//! All 128-bit vectors are stored as little-endian byte arrays. The
//! `vec128` helper takes the four 32-bit words most-significant first, which
//! keeps the tables readable against their usual big-endian-ish notation.

/// Bytes per scratchpad/dataset cache line.
pub const CACHE_LINE_SIZE: usize = 64;

/// Size of the seed state threaded through the AES generators.
pub const SEED_SIZE: usize = 64;

/// Integer registers in the VM register file.
pub const REGISTER_COUNT: usize = 8;

/// Floating-point register groups (f, e, a) each hold this many registers.
pub const FLOAT_REGISTER_COUNT: usize = 4;

/// Size of the binary register file hashed between program executions.
pub const REGISTER_FILE_SIZE: usize = 256;

/// Mantissa bits of an IEEE 754 double.
pub const MANTISSA_SIZE: u32 = 52;

/// Mask covering the mantissa of an IEEE 754 double.
pub const MANTISSA_MASK: u64 = (1 << MANTISSA_SIZE) - 1;

/// IEEE 754 double exponent bias.
pub const EXPONENT_BIAS: u64 = 1023;

/// Bits of the group-E dynamic exponent taken from entropy.
pub const STATIC_EXPONENT_BITS: u32 = 4;

/// Fixed high exponent bits of group-E operands.
pub const CONST_EXPONENT_BITS: u64 = 0x300;

/// Group-E operands keep this many low bits of the converted value.
pub const DYNAMIC_MANTISSA_MASK: u64 = (1 << (MANTISSA_SIZE + STATIC_EXPONENT_BITS)) - 1;

/// XOR mask applied by the scale operation: flips the sign and subtracts
/// 0x0F0 from the exponent.
pub const SCALE_MASK: u64 = 0x80F0_0000_0000_0000;

const fn vec128(w3: u32, w2: u32, w1: u32, w0: u32) -> [u8; 16] {
    let a = w0.to_le_bytes();
    let b = w1.to_le_bytes();
    let c = w2.to_le_bytes();
    let d = w3.to_le_bytes();
    [
        a[0], a[1], a[2], a[3], b[0], b[1], b[2], b[3], c[0], c[1], c[2], c[3], d[0], d[1], d[2],
        d[3],
    ]
}

// =============================================================================
// SCRATCHPAD FILL (one round per column)
// =============================================================================

/// Round keys of the 1-round fill generator.
pub const FILL_1R_KEYS: [[u8; 16]; 4] = [
    vec128(0xb4f44917, 0xdbb5552b, 0x62716609, 0x6daca553),
    vec128(0x0da1dc4e, 0x1725d378, 0x846a710d, 0x6d7caf07),
    vec128(0x3e20e345, 0xf4c0794f, 0x9f947ec6, 0x3f1262f1),
    vec128(0x49169154, 0x16314c88, 0xb1ba317c, 0x6aef8135),
];

// =============================================================================
// PROGRAM GENERATION (four rounds per column)
// =============================================================================

/// Round keys of the 4-round program generator. Columns 0 and 1 use keys
/// 0..=3, columns 2 and 3 use keys 4..=7.
pub const FILL_4R_KEYS: [[u8; 16]; 8] = [
    vec128(0x99e5d23f, 0x2f546d2b, 0xd1833ddb, 0x6421aadd),
    vec128(0xa5dfcde5, 0x06f79d53, 0xb6913f55, 0xb20e3450),
    vec128(0x171c02bf, 0x0aa4679f, 0x515e7baf, 0x5c3ed904),
    vec128(0xd8ded291, 0xcd673785, 0xe78f5d08, 0x85623763),
    vec128(0x229effb4, 0x3d518b6d, 0xe3d6a7a6, 0xb5826f73),
    vec128(0xb272b7d2, 0xe9024d4e, 0x9c10b3d9, 0xc7566bf3),
    vec128(0xf63befa7, 0x2ba9660a, 0xf765a38b, 0xf273c9e7),
    vec128(0xc0b0762d, 0x0c06d1fd, 0x915839de, 0x7a7cd609),
];

/// Legacy program generator keys kept by one of the forked parameter sets:
/// the 1-round fill keys reused for all four rounds of each column pair.
pub const FILL_4R_KEYS_LEGACY: [[u8; 16]; 8] = [
    FILL_1R_KEYS[0],
    FILL_1R_KEYS[1],
    FILL_1R_KEYS[2],
    FILL_1R_KEYS[3],
    FILL_1R_KEYS[0],
    FILL_1R_KEYS[1],
    FILL_1R_KEYS[2],
    FILL_1R_KEYS[3],
];

// =============================================================================
// SCRATCHPAD FINGERPRINT
// =============================================================================

/// Initial column states of the scratchpad fingerprint.
pub const FINGERPRINT_STATE: [[u8; 16]; 4] = [
    vec128(0xd7983aad, 0xcc82db47, 0x9fa856de, 0x92b52c0d),
    vec128(0xace78057, 0xf59e125a, 0x15c7b798, 0x338d996e),
    vec128(0xe8a07ce4, 0x5079506b, 0xae62c7d0, 0x6a770017),
    vec128(0x7e994948, 0x79a10005, 0x07ad828d, 0x630a240c),
];

/// Finalisation keys mixed into every fingerprint column after the data pass.
pub const FINGERPRINT_XKEYS: [[u8; 16]; 2] = [
    vec128(0x06890201, 0x90dc56bf, 0x8b24949f, 0xf6fa8389),
    vec128(0xed18f99b, 0xee1043c6, 0x51f4e03c, 0x61b263d1),
];

// =============================================================================
// DATASET ITEM MIXING
// =============================================================================

/// Multiplier seeding register 0 of a dataset item from its item number.
pub const ITEM_MUL: u64 = 6364136223846793005;

/// XOR constants seeding registers 1..=7 of a dataset item.
pub const ITEM_XOR: [u64; 7] = [
    9298411001130361340,
    12065312585734608966,
    9306329213124626780,
    5281919268842080866,
    10536153434571861004,
    3398623926847679864,
    9549104520008361294,
];
