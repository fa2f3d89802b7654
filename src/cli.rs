//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Health checks for a SolarEdge inverter fleet.
#[derive(Parser, Debug)]
#[command(name = "solar-sentinel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "SOLAR_SENTINEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Environment file to load before anything else (default: ./.env when present)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Force debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print the run record as one JSON line instead of human-readable lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Only warnings and errors on the console
    #[arg(long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn selected(&self) -> Command {
        self.command.clone().unwrap_or(Command::Health)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Read all inverters, evaluate health and send due alerts (default)
    Health,

    /// Run against simulated devices
    Simulate(SimulateArgs),

    /// Send a test message through every configured notification channel
    NotifyTest(NotifyTestArgs),

    /// Prune old snapshots and summaries
    MaintainDb(MaintainDbArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulateArgs {
    /// Built-in or configured scenario name
    #[arg(long)]
    pub scenario: String,

    /// Repeat the run this many times
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: u32,

    /// Use the configured state store instead of a throwaway in-memory one
    #[arg(long)]
    pub persist: bool,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct NotifyTestArgs {
    #[arg(long, value_enum, default_value_t = NotifyTestMode::Both)]
    pub mode: NotifyTestMode,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTestMode {
    Healthy,
    Fault,
    Both,
}

impl NotifyTestMode {
    /// The `healthy` flags to send, in order.
    pub fn states(self) -> &'static [bool] {
        match self {
            NotifyTestMode::Healthy => &[true],
            NotifyTestMode::Fault => &[false],
            NotifyTestMode::Both => &[true, false],
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct MaintainDbArgs {
    /// Override retention.snapshot_days
    #[arg(long)]
    pub snapshot_days: Option<u32>,

    /// Override retention.summary_days
    #[arg(long)]
    pub summary_days: Option<u32>,

    /// Skip VACUUM after pruning
    #[arg(long)]
    pub no_vacuum: bool,
}
