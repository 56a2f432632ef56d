//! CLI Commands
//!
//! All quasar CLI commands organized as separate modules.

mod bench;
mod hash;
mod info;
mod verify;

pub use bench::{bench_mode, BenchArgs};
pub use hash::{hash_mode, HashArgs};
pub use info::{info_mode, InfoArgs};
pub use verify::{verify_mode, VerifyArgs};

use anyhow::Result;
use clap::ValueEnum;
use quasar::{Engine, EngineOptions, Flags, MemoryMode, Variant};

/// Parameter set selector shared by all commands.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum VariantArg {
    #[default]
    Monero,
    Wownero,
    Arqma,
    Graft,
    Safex,
    Yada,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Monero => Self::Monero,
            VariantArg::Wownero => Self::Wownero,
            VariantArg::Arqma => Self::Arqma,
            VariantArg::Graft => Self::Graft,
            VariantArg::Safex => Self::Safex,
            VariantArg::Yada => Self::Yada,
        }
    }
}

/// Builds an engine from the common command-line knobs.
pub(crate) fn build_engine(
    variant: VariantArg,
    key: &[u8],
    full: bool,
    threads: usize,
    precompiled: bool,
) -> Result<Engine> {
    let mut flags = Flags::empty();
    if precompiled {
        flags |= Flags::PRECOMPILED;
    }
    let options = EngineOptions {
        variant: variant.into(),
        mode: if full {
            MemoryMode::AlwaysFull
        } else {
            MemoryMode::AlwaysLight
        },
        flags,
        init_threads: threads,
        numa_node: None,
    };
    Ok(Engine::new(&options, key)?)
}

/// Decodes an input argument, treating it as hex when requested.
pub(crate) fn decode_input(input: &str, is_hex: bool) -> Result<Vec<u8>> {
    if is_hex {
        Ok(hex::decode(input.trim())?)
    } else {
        Ok(input.as_bytes().to_vec())
    }
}
