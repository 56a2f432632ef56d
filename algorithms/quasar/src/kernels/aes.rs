//! AES-round generators.
//!
//! Three bulk primitives built from single AES rounds over four independent
//! 128-bit columns: a 1-round filler for scratchpad initialisation, a 4-round
//! filler for program generation, and a fingerprint that absorbs the final
//! scratchpad into a 64-byte state.
//!
//! Columns alternate between encryption and decryption rounds so the four
//! lanes never collapse into each other. The `aes` crate picks hardware AES
//! rounds where the CPU has them and falls back to a constant-time software
//! implementation elsewhere; output is identical either way.

use aes::hazmat::{cipher_round, equiv_inv_cipher_round};
use aes::Block;

use crate::kernels::constants::{
    FILL_1R_KEYS, FINGERPRINT_STATE, FINGERPRINT_XKEYS, SEED_SIZE,
};

#[inline]
fn load_columns(bytes: &[u8; SEED_SIZE]) -> [Block; 4] {
    let mut cols = [Block::default(); 4];
    for (col, chunk) in cols.iter_mut().zip(bytes.chunks_exact(16)) {
        *col = Block::clone_from_slice(chunk);
    }
    cols
}

#[inline]
fn store_columns(cols: &[Block; 4], chunk: &mut [u8]) {
    for (col, slot) in cols.iter().zip(chunk.chunks_exact_mut(16)) {
        slot.copy_from_slice(col.as_slice());
    }
}

#[inline]
fn key_blocks<const N: usize>(keys: &[[u8; 16]; N]) -> [Block; N] {
    let mut out = [Block::default(); N];
    for (block, key) in out.iter_mut().zip(keys) {
        *block = Block::from(*key);
    }
    out
}

/// Expands `seed` into `out` with one AES round per column per 64-byte block,
/// then writes the final generator state back into `seed`.
///
/// `out.len()` must be a multiple of 64.
pub(crate) fn fill_1r(seed: &mut [u8; SEED_SIZE], out: &mut [u8]) {
    debug_assert_eq!(out.len() % SEED_SIZE, 0);

    let keys = key_blocks(&FILL_1R_KEYS);
    let mut cols = load_columns(seed);

    for chunk in out.chunks_exact_mut(SEED_SIZE) {
        equiv_inv_cipher_round(&mut cols[0], &keys[0]);
        cipher_round(&mut cols[1], &keys[1]);
        equiv_inv_cipher_round(&mut cols[2], &keys[2]);
        cipher_round(&mut cols[3], &keys[3]);
        store_columns(&cols, chunk);
    }

    store_columns(&cols, seed);
}

/// Expands `seed` into `out` with four AES rounds per column per 64-byte
/// block. Columns 0 and 1 use `keys[0..4]`, columns 2 and 3 use `keys[4..8]`.
///
/// Unlike [`fill_1r`] the seed is not advanced; the caller reuses the same
/// seed for chained program generation and replaces it between programs.
pub(crate) fn fill_4r(seed: &[u8; SEED_SIZE], keys: &[[u8; 16]; 8], out: &mut [u8]) {
    debug_assert_eq!(out.len() % SEED_SIZE, 0);

    let keys = key_blocks(keys);
    let mut cols = load_columns(seed);

    for chunk in out.chunks_exact_mut(SEED_SIZE) {
        for r in 0..4 {
            equiv_inv_cipher_round(&mut cols[0], &keys[r]);
            cipher_round(&mut cols[1], &keys[r]);
            equiv_inv_cipher_round(&mut cols[2], &keys[r + 4]);
            cipher_round(&mut cols[3], &keys[r + 4]);
        }
        store_columns(&cols, chunk);
    }
}

/// Absorbs `data` into a 64-byte fingerprint: one AES round per column per
/// 64-byte block with the block itself as the round key, then two
/// finalisation rounds with fixed keys.
///
/// `data.len()` must be a multiple of 64.
pub(crate) fn fingerprint(data: &[u8]) -> [u8; SEED_SIZE] {
    debug_assert_eq!(data.len() % SEED_SIZE, 0);

    let mut cols = [Block::default(); 4];
    for (col, init) in cols.iter_mut().zip(&FINGERPRINT_STATE) {
        col.copy_from_slice(init);
    }

    for chunk in data.chunks_exact(SEED_SIZE) {
        cipher_round(&mut cols[0], &Block::clone_from_slice(&chunk[0..16]));
        equiv_inv_cipher_round(&mut cols[1], &Block::clone_from_slice(&chunk[16..32]));
        cipher_round(&mut cols[2], &Block::clone_from_slice(&chunk[32..48]));
        equiv_inv_cipher_round(&mut cols[3], &Block::clone_from_slice(&chunk[48..64]));
    }

    let xkeys = key_blocks(&FINGERPRINT_XKEYS);
    for xkey in &xkeys {
        cipher_round(&mut cols[0], xkey);
        equiv_inv_cipher_round(&mut cols[1], xkey);
        cipher_round(&mut cols[2], xkey);
        equiv_inv_cipher_round(&mut cols[3], xkey);
    }

    let mut out = [0_u8; SEED_SIZE];
    store_columns(&cols, &mut out);
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::constants::FILL_4R_KEYS;

    #[test]
    fn fill_1r_is_deterministic_and_advances_seed() {
        let mut seed_a = [7_u8; SEED_SIZE];
        let mut seed_b = [7_u8; SEED_SIZE];
        let mut out_a = vec![0_u8; 256];
        let mut out_b = vec![0_u8; 256];

        fill_1r(&mut seed_a, &mut out_a);
        fill_1r(&mut seed_b, &mut out_b);

        assert_eq!(out_a, out_b);
        assert_ne!(seed_a, [7_u8; SEED_SIZE]);
        assert_eq!(seed_a, seed_b);
        // The written state equals the last generated block.
        assert_eq!(&out_a[192..256], &seed_a[..]);
    }

    #[test]
    fn fill_1r_continues_where_it_stopped() {
        let mut seed_whole = [42_u8; SEED_SIZE];
        let mut whole = vec![0_u8; 512];
        fill_1r(&mut seed_whole, &mut whole);

        let mut seed_split = [42_u8; SEED_SIZE];
        let mut parts = vec![0_u8; 512];
        let (head, tail) = parts.split_at_mut(192);
        fill_1r(&mut seed_split, head);
        fill_1r(&mut seed_split, tail);

        assert_eq!(whole, parts);
        assert_eq!(seed_whole, seed_split);
    }

    #[test]
    fn fill_4r_keeps_seed_and_depends_on_keys() {
        let seed = [3_u8; SEED_SIZE];
        let mut out_a = vec![0_u8; 128];
        let mut out_b = vec![0_u8; 128];

        fill_4r(&seed, &FILL_4R_KEYS, &mut out_a);

        let mut other_keys = FILL_4R_KEYS;
        other_keys[0][0] ^= 1;
        fill_4r(&seed, &other_keys, &mut out_b);

        assert_ne!(out_a, out_b);
        assert_eq!(seed, [3_u8; SEED_SIZE]);
    }

    #[test]
    fn fingerprint_differs_on_single_bit_flip() {
        let mut data = vec![0x5c_u8; 2048];
        let a = fingerprint(&data);
        data[1024] ^= 0x80;
        let b = fingerprint(&data);
        assert_ne!(a, b);
    }
}
