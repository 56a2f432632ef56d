//! Quasar CLI
//!
//! Hashing, verification and throughput measurement for the Quasar
//! proof-of-work engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

// =============================================================================
// CLI DEFINITION
// =============================================================================

#[derive(Parser)]
#[command(name = "quasar")]
#[command(about = "Memory-hard proof-of-work hashing", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash inputs with a seed key
    Hash(commands::HashArgs),
    /// Check an input against an expected digest
    Verify(commands::VerifyArgs),
    /// Measure hashing throughput
    Bench(commands::BenchArgs),
    /// Show parameters and memory requirements of a variant
    Info(commands::InfoArgs),
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Hash(args) => commands::hash_mode(&args),
        Commands::Verify(args) => commands::verify_mode(&args),
        Commands::Bench(args) => commands::bench_mode(&args),
        Commands::Info(args) => commands::info_mode(&args),
    }
}
