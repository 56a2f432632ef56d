//! Argon2d block fill (version 0x13).
//!
//! Only the memory-filling core is implemented, the way the cache key
//! derivation invokes it: data-dependent addressing, zero output length in
//! the prehash, no secret or associated data, and the filled block array as
//! the result. The general-purpose Argon2 crates bake a real output length
//! into the prehash and never expose the memory, which makes them produce a
//! different block array for the same key.

use crate::types::{Error, Result};

/// 64-bit words per block.
pub(crate) const BLOCK_WORDS: usize = 128;

/// One 1 KiB Argon2 block.
pub(crate) type Block = [u64; BLOCK_WORDS];

const ZERO_BLOCK: Block = [0; BLOCK_WORDS];
const SYNC_POINTS: u32 = 4;
const VERSION: u32 = 0x13;
const ARGON2D: u32 = 0;

/// Fill parameters. `m_cost` is in KiB blocks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Params {
    pub m_cost: u32,
    pub t_cost: u32,
    pub lanes: u32,
}

/// Fills and returns the block array for `key` and `salt`.
pub(crate) fn fill(key: &[u8], salt: &[u8], params: Params) -> Result<Vec<Block>> {
    let memory_blocks = params.m_cost / (4 * params.lanes) * 4 * params.lanes;
    if memory_blocks == 0 {
        return Err(Error::Config("Argon2 memory too small for the lane count"));
    }
    let lane_length = (memory_blocks / params.lanes) as usize;
    let segment_length = lane_length / SYNC_POINTS as usize;

    let mut memory: Vec<Block> = Vec::new();
    memory
        .try_reserve_exact(memory_blocks as usize)
        .map_err(|_| Error::Allocation("Argon2 block array"))?;
    memory.resize(memory_blocks as usize, ZERO_BLOCK);

    let h0 = initial_hash(key, salt, params);
    for lane in 0..params.lanes as usize {
        memory[lane * lane_length] = first_block(&h0, 0, lane as u32);
        memory[lane * lane_length + 1] = first_block(&h0, 1, lane as u32);
    }

    for pass in 0..params.t_cost {
        for slice in 0..SYNC_POINTS {
            for lane in 0..params.lanes {
                fill_segment(
                    &mut memory,
                    pass,
                    lane as usize,
                    slice as usize,
                    params.lanes,
                    lane_length,
                    segment_length,
                );
            }
        }
    }
    Ok(memory)
}

// =============================================================================
// INITIALISATION
// =============================================================================

fn initial_hash(key: &[u8], salt: &[u8], params: Params) -> [u8; 64] {
    let mut state = blake2b_simd::Params::new().hash_length(64).to_state();
    for word in [
        params.lanes,
        0, // output length; the fill has no tag output
        params.m_cost,
        params.t_cost,
        VERSION,
        ARGON2D,
        key.len() as u32,
    ] {
        state.update(&word.to_le_bytes());
    }
    state.update(key);
    state.update(&(salt.len() as u32).to_le_bytes());
    state.update(salt);
    state.update(&0_u32.to_le_bytes()); // secret length
    state.update(&0_u32.to_le_bytes()); // associated data length
    let mut h0 = [0_u8; 64];
    h0.copy_from_slice(state.finalize().as_bytes());
    h0
}

/// Variable-length hash H' for 1024-byte output, seeded with H0, the block
/// index within the lane and the lane number.
fn first_block(h0: &[u8; 64], index: u32, lane: u32) -> Block {
    let mut bytes = [0_u8; 1024];

    let mut state = blake2b_simd::Params::new().hash_length(64).to_state();
    state.update(&1024_u32.to_le_bytes());
    state.update(h0);
    state.update(&index.to_le_bytes());
    state.update(&lane.to_le_bytes());

    let mut v = [0_u8; 64];
    v.copy_from_slice(state.finalize().as_bytes());
    bytes[..32].copy_from_slice(&v[..32]);

    let mut written = 32;
    let mut to_produce = 1024 - 32;
    while to_produce > 64 {
        let next = blake2b_simd::blake2b(&v);
        v.copy_from_slice(next.as_bytes());
        bytes[written..written + 32].copy_from_slice(&v[..32]);
        written += 32;
        to_produce -= 32;
    }
    let last = blake2b_simd::Params::new().hash_length(64).hash(&v);
    bytes[written..].copy_from_slice(last.as_bytes());

    let mut block = ZERO_BLOCK;
    for (word, chunk) in block.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut le = [0_u8; 8];
        le.copy_from_slice(chunk);
        *word = u64::from_le_bytes(le);
    }
    block
}

// =============================================================================
// SEGMENT FILL
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn fill_segment(
    memory: &mut [Block],
    pass: u32,
    lane: usize,
    slice: usize,
    lanes: u32,
    lane_length: usize,
    segment_length: usize,
) {
    let starting_index = if pass == 0 && slice == 0 { 2 } else { 0 };
    let mut curr_offset = lane * lane_length + slice * segment_length + starting_index;
    let mut prev_offset = if curr_offset % lane_length == 0 {
        curr_offset + lane_length - 1
    } else {
        curr_offset - 1
    };

    for index in starting_index..segment_length {
        // The first block of a lane refers back to the last one.
        if curr_offset % lane_length == 1 {
            prev_offset = curr_offset - 1;
        }

        let pseudo_rand = memory[prev_offset][0];
        let ref_lane = if pass == 0 && slice == 0 {
            lane
        } else {
            ((pseudo_rand >> 32) % u64::from(lanes)) as usize
        };
        let ref_index = index_alpha(
            pass,
            slice,
            index,
            segment_length,
            lane_length,
            pseudo_rand as u32,
            ref_lane == lane,
        );

        let prev = memory[prev_offset];
        let reference = memory[ref_lane * lane_length + ref_index];
        fill_block(&prev, &reference, &mut memory[curr_offset], pass > 0);

        prev_offset = curr_offset;
        curr_offset += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn index_alpha(
    pass: u32,
    slice: usize,
    index: usize,
    segment_length: usize,
    lane_length: usize,
    j1: u32,
    same_lane: bool,
) -> usize {
    let reference_area_size = if pass == 0 {
        if slice == 0 {
            index - 1
        } else if same_lane {
            slice * segment_length + index - 1
        } else {
            slice * segment_length - usize::from(index == 0)
        }
    } else if same_lane {
        lane_length - segment_length + index - 1
    } else {
        lane_length - segment_length - usize::from(index == 0)
    };

    let mut relative = u64::from(j1);
    relative = (relative * relative) >> 32;
    relative = reference_area_size as u64 - 1 - ((reference_area_size as u64 * relative) >> 32);

    let start_position = if pass == 0 || slice == SYNC_POINTS as usize - 1 {
        0
    } else {
        (slice + 1) * segment_length
    };
    ((start_position as u64 + relative) % lane_length as u64) as usize
}

// =============================================================================
// COMPRESSION
// =============================================================================

/// Multiply-hardened quarter-round addition.
const fn blamka(x: u64, y: u64) -> u64 {
    let m = (x & 0xFFFF_FFFF).wrapping_mul(y & 0xFFFF_FFFF);
    x.wrapping_add(y).wrapping_add(m.wrapping_mul(2))
}

fn quarter_round(v: &mut [u64; BLOCK_WORDS], a: usize, b: usize, c: usize, d: usize) {
    v[a] = blamka(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = blamka(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = blamka(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = blamka(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

fn permute(v: &mut [u64; BLOCK_WORDS], idx: &[usize; 16]) {
    quarter_round(v, idx[0], idx[4], idx[8], idx[12]);
    quarter_round(v, idx[1], idx[5], idx[9], idx[13]);
    quarter_round(v, idx[2], idx[6], idx[10], idx[14]);
    quarter_round(v, idx[3], idx[7], idx[11], idx[15]);
    quarter_round(v, idx[0], idx[5], idx[10], idx[15]);
    quarter_round(v, idx[1], idx[6], idx[11], idx[12]);
    quarter_round(v, idx[2], idx[7], idx[8], idx[13]);
    quarter_round(v, idx[3], idx[4], idx[9], idx[14]);
}

fn fill_block(prev: &Block, reference: &Block, next: &mut Block, with_xor: bool) {
    let mut r = ZERO_BLOCK;
    for i in 0..BLOCK_WORDS {
        r[i] = prev[i] ^ reference[i];
    }
    let mut tmp = r;
    if with_xor {
        for i in 0..BLOCK_WORDS {
            tmp[i] ^= next[i];
        }
    }

    for row in 0..8 {
        let base = row * 16;
        let mut idx = [0_usize; 16];
        for (j, slot) in idx.iter_mut().enumerate() {
            *slot = base + j;
        }
        permute(&mut r, &idx);
    }
    for col in 0..8 {
        let mut idx = [0_usize; 16];
        for (j, slot) in idx.iter_mut().enumerate() {
            *slot = 2 * col + 16 * (j / 2) + (j & 1);
        }
        permute(&mut r, &idx);
    }

    for i in 0..BLOCK_WORDS {
        next[i] = tmp[i] ^ r[i];
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SMALL: Params = Params {
        m_cost: 32,
        t_cost: 3,
        lanes: 1,
    };

    #[test]
    fn fill_is_deterministic() {
        let a = fill(b"key", b"somesalt", SMALL).unwrap();
        let b = fill(b"key", b"somesalt", SMALL).unwrap();
        assert_eq!(a, b);
        assert_ne!(a[0], ZERO_BLOCK);
    }

    #[test]
    fn key_salt_and_params_all_matter() {
        let base = fill(b"key", b"somesalt", SMALL).unwrap();
        assert_ne!(base, fill(b"yek", b"somesalt", SMALL).unwrap());
        assert_ne!(base, fill(b"key", b"othersalt", SMALL).unwrap());

        let mut more_passes = SMALL;
        more_passes.t_cost = 4;
        assert_ne!(base, fill(b"key", b"somesalt", more_passes).unwrap());
    }

    #[test]
    fn two_lanes_change_the_layout() {
        let two = Params {
            m_cost: 32,
            t_cost: 1,
            lanes: 2,
        };
        let one = Params {
            m_cost: 32,
            t_cost: 1,
            lanes: 1,
        };
        assert_ne!(fill(b"key", b"somesalt", two).unwrap(), fill(b"key", b"somesalt", one).unwrap());
    }

    #[test]
    fn every_block_is_touched() {
        let memory = fill(b"key", b"somesalt", SMALL).unwrap();
        assert_eq!(memory.len(), 32);
        for block in &memory {
            assert_ne!(*block, ZERO_BLOCK);
        }
    }
}
