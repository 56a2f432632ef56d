//! Info Command
//!
//! Prints the parameter set and memory footprint of a variant.

use anyhow::Result;
use clap::Args;
use quasar::Variant;

use super::VariantArg;

#[derive(Args)]
pub struct InfoArgs {
    /// Parameter set
    #[arg(short, long, value_enum, default_value_t = VariantArg::Monero)]
    pub variant: VariantArg,
}

pub fn info_mode(args: &InfoArgs) -> Result<()> {
    let variant = Variant::from(args.variant);
    let cfg = variant.configuration();
    cfg.validate()?;

    println!("variant:             {variant}");
    println!("cache size:          {} MiB", cfg.cache_size() >> 20);
    println!(
        "dataset size:        {} MiB ({} items)",
        cfg.dataset_size() >> 20,
        cfg.dataset_item_count()
    );
    println!(
        "scratchpad:          {} KiB (L1 {} KiB, L2 {} KiB)",
        cfg.scratchpad_l3 >> 10,
        cfg.scratchpad_l1 >> 10,
        cfg.scratchpad_l2 >> 10
    );
    println!(
        "programs:            {} x {} instructions, {} iterations",
        cfg.program_count, cfg.program_size, cfg.program_iterations
    );
    println!(
        "argon2d:             {} MiB, {} passes, {} lanes",
        u64::from(cfg.argon_memory) >> 10,
        cfg.argon_iterations,
        cfg.argon_lanes
    );
    println!(
        "cache accesses:      {} programs, latency {}",
        cfg.cache_accesses, cfg.superscalar_latency
    );
    Ok(())
}
