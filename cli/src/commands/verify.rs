//! Verify Command
//!
//! Recomputes a digest and compares it against an expected value in
//! constant time.

use anyhow::{bail, Result};
use clap::Args;

use super::{build_engine, decode_input, VariantArg};

#[derive(Args)]
pub struct VerifyArgs {
    /// Input to hash (hex string with --hex, raw bytes otherwise)
    #[arg(value_name = "INPUT")]
    pub input: String,

    /// Expected 32-byte digest, hex encoded
    #[arg(value_name = "DIGEST")]
    pub expected: String,

    /// Seed key the cache is derived from
    #[arg(short, long)]
    pub key: String,

    /// Parameter set
    #[arg(short, long, value_enum, default_value_t = VariantArg::Monero)]
    pub variant: VariantArg,

    /// Treat the input as a hex string
    #[arg(long)]
    pub hex: bool,
}

pub fn verify_mode(args: &VerifyArgs) -> Result<()> {
    let expected: [u8; 32] = hex::decode(args.expected.trim())?
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected digest must be exactly 32 bytes"))?;

    let engine = build_engine(args.variant, args.key.as_bytes(), false, 0, false)?;
    let mut vm = engine.create_vm()?;
    let digest = vm.hash(&decode_input(&args.input, args.hex)?)?;

    if quasar::verify(&digest, &expected) {
        println!("OK");
        Ok(())
    } else {
        eprintln!("computed: {}", hex::encode(digest));
        bail!("digest mismatch");
    }
}
