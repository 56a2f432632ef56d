//! Reference digests for the default parameter set.
//!
//! These pin the whole pipeline end to end: Argon2d fill, program
//! generation, VM execution and final condensation. A failure here means an
//! incompatible change somewhere in the chain.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, OnceLock};

use quasar::{Cache, Flags, Variant, Vm};

fn cache(key: &[u8]) -> Arc<Cache> {
    Arc::new(Cache::new(&Variant::Monero.configuration(), key).unwrap())
}

fn cache_000() -> Arc<Cache> {
    static CACHE: OnceLock<Arc<Cache>> = OnceLock::new();
    Arc::clone(CACHE.get_or_init(|| cache(b"test key 000")))
}

fn digest_hex(vm: &mut Vm, input: &[u8]) -> String {
    hex::encode(vm.hash(input).unwrap())
}

#[test]
fn key_000_vectors() {
    let mut vm = Vm::light(cache_000(), Flags::empty()).unwrap();
    assert_eq!(
        digest_hex(&mut vm, b"This is a test"),
        "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f"
    );
    assert_eq!(
        digest_hex(&mut vm, b"Lorem ipsum dolor sit amet"),
        "300a0adb47603dedb42228ccb2b211104f4da45af709cd7547cd049e9489c969"
    );
}

#[test]
fn key_000_dataset_items() {
    // Item-level pins localise a digest mismatch to the cache/dataset side
    // of the pipeline. Word 0 of selected items, key "test key 000".
    let cache = cache_000();
    for (item, word) in [
        (0, 0x680588a85ae222db_u64),
        (10_000_000, 0x7943a1f6186ffb72),
        (20_000_000, 0x9035244d718095e1),
        (30_000_000, 0x145a5091f7853099),
    ] {
        let mut line = [0_u8; 64];
        quasar::initialize_items(&cache, item, 1, &mut line).unwrap();
        assert_eq!(
            u64::from_le_bytes(line[..8].try_into().unwrap()),
            word,
            "item {item}"
        );
    }
}

#[test]
fn key_001_vector() {
    let mut vm = Vm::light(cache(b"test key 001"), Flags::empty()).unwrap();
    assert_eq!(
        digest_hex(
            &mut vm,
            b"sed do eiusmod tempor incididunt ut labore et dolore magna aliqua"
        ),
        "e9ff4503201c0c2cca26d285c93ae883f9b1d30c9eb240b820756f2d5a7905fc"
    );
}

#[test]
fn verify_accepts_the_reference_digest() {
    let mut vm = Vm::light(cache_000(), Flags::empty()).unwrap();
    let digest = vm.hash(b"This is a test").unwrap();
    let expected: [u8; 32] =
        hex::decode("639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f")
            .unwrap()
            .try_into()
            .unwrap();
    assert!(quasar::verify(&digest, &expected));
    assert!(!quasar::verify(&digest, &[0; 32]));
}

#[test]
fn single_bit_flips_change_everything() {
    let mut vm = Vm::light(cache_000(), Flags::empty()).unwrap();
    let base = b"avalanche probe".to_vec();
    let mut digests = vec![vm.hash(&base).unwrap()];
    for bit in 0..base.len() * 8 {
        let mut flipped = base.clone();
        flipped[bit / 8] ^= 1 << (bit % 8);
        digests.push(vm.hash(&flipped).unwrap());
    }
    for (i, a) in digests.iter().enumerate() {
        for b in &digests[i + 1..] {
            assert_ne!(a, b);
        }
    }
}
