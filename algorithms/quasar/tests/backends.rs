//! Backend equivalence on a production-sized parameter set.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, OnceLock};

use quasar::{Cache, Flags, Variant, Vm};

fn shared_cache() -> Arc<Cache> {
    static CACHE: OnceLock<Arc<Cache>> = OnceLock::new();
    Arc::clone(CACHE.get_or_init(|| {
        Arc::new(Cache::new(&Variant::Arqma.configuration(), b"backend test key").unwrap())
    }))
}

#[test]
fn backends_agree_on_random_inputs() {
    use rand::RngExt;

    let mut soft = Vm::light(shared_cache(), Flags::empty()).unwrap();
    let mut fast = Vm::light(shared_cache(), Flags::PRECOMPILED).unwrap();

    let mut rng = rand::rng();
    for _ in 0..4 {
        let input: [u8; 48] = rng.random();
        assert_eq!(soft.hash(&input).unwrap(), fast.hash(&input).unwrap());
    }
}

#[test]
fn pipelined_hashing_matches_one_shot() {
    let mut oneshot = Vm::light(shared_cache(), Flags::PRECOMPILED).unwrap();
    let mut pipelined = Vm::light(shared_cache(), Flags::PRECOMPILED).unwrap();

    let inputs: [&[u8]; 4] = [b"nonce 0", b"nonce 1", b"nonce 2", b"nonce 3"];
    let expected: Vec<_> = inputs.iter().map(|i| oneshot.hash(i).unwrap()).collect();

    let mut got = Vec::new();
    pipelined.hash_first(inputs[0]).unwrap();
    for input in &inputs[1..] {
        got.push(pipelined.hash_next(input).unwrap());
    }
    got.push(pipelined.hash_last().unwrap());
    assert_eq!(got, expected);
}

#[test]
#[ignore = "expands the full 2 GiB dataset"]
fn light_and_full_agree_on_production_parameters() {
    let cache = shared_cache();
    let mut dataset = quasar::Dataset::new(cache.config(), Flags::empty(), None).unwrap();
    dataset.init_full(&cache, 8).unwrap();

    let mut full = Vm::full(Arc::new(dataset), Flags::PRECOMPILED).unwrap();
    let mut light = Vm::light(shared_cache(), Flags::PRECOMPILED).unwrap();
    for input in [&b"probe a"[..], b"probe b"] {
        assert_eq!(light.hash(input).unwrap(), full.hash(input).unwrap());
    }
}

#[test]
fn variants_produce_distinct_digests() {
    // Same key and input, different parameter sets.
    let monero = quasar::hash(Variant::Monero, b"variant key", b"input").unwrap();
    let arqma = quasar::hash(Variant::Arqma, b"variant key", b"input").unwrap();
    assert_ne!(monero, arqma);
}
