use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// synth-maker: synthetic market makers against a simulated venue.
#[derive(Parser, Debug)]
#[command(name = "synth-maker", version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bootstrap every enabled maker and run until interrupted
    Run(RunArgs),

    /// Validate a maker config record
    Check(CheckArgs),

    /// Validate a maker config record and store it
    Put(PutArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Venue description: symbols and opening deposits (JSON)
    #[arg(long, env = "MAKER_VENUE_FILE")]
    pub venue: PathBuf,

    /// Directory holding `maker-<symbol>.json` config records
    #[arg(long, env = "MAKER_CONF_DIR")]
    pub conf_dir: PathBuf,

    /// Seed for every maker's random source (random if omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Interval between status lines (ms)
    #[arg(long, default_value = "10000")]
    pub status_interval_ms: u64,

    /// Interval between simulated taker fills (ms, 0 disables)
    #[arg(long, default_value = "0")]
    pub taker_interval_ms: u64,
}

/// Arguments for the `check` subcommand.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Config record to validate
    pub file: PathBuf,
}

/// Arguments for the `put` subcommand.
#[derive(Parser, Debug)]
pub struct PutArgs {
    /// Config record to store
    pub file: PathBuf,

    /// Directory holding `maker-<symbol>.json` config records
    #[arg(long, env = "MAKER_CONF_DIR")]
    pub conf_dir: PathBuf,
}
