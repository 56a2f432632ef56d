//! Hash Command
//!
//! Hashes one or more inputs under a seed key and prints the digests.

use anyhow::Result;
use clap::Args;

use super::{build_engine, decode_input, VariantArg};

#[derive(Args)]
pub struct HashArgs {
    /// Inputs to hash (hex strings with --hex, raw bytes otherwise)
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<String>,

    /// Seed key the cache is derived from
    #[arg(short, long)]
    pub key: String,

    /// Parameter set
    #[arg(short, long, value_enum, default_value_t = VariantArg::Monero)]
    pub variant: VariantArg,

    /// Treat inputs as hex strings
    #[arg(long)]
    pub hex: bool,

    /// Expand the full dataset before hashing
    #[arg(long)]
    pub full: bool,

    /// Dataset initialisation threads (0 = all cores)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Use the precompiled execution backend
    #[arg(long)]
    pub precompiled: bool,
}

pub fn hash_mode(args: &HashArgs) -> Result<()> {
    let engine = build_engine(
        args.variant,
        args.key.as_bytes(),
        args.full,
        args.threads,
        args.precompiled,
    )?;
    let mut vm = engine.create_vm()?;

    for input in &args.inputs {
        let bytes = decode_input(input, args.hex)?;
        let digest = vm.hash(&bytes)?;
        println!("{}  {}", hex::encode(digest), input);
    }
    Ok(())
}
