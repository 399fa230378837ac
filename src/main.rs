//! Concord - unified CLI entrypoint.
//!
//! Usage:
//!   concord start --config config/concord.toml
//!   concord config validate --config config/concord.toml
//!   concord inspect journal <path>

use anyhow::Result;
use clap::Parser;
use concord::cli::commands::{run_config, run_inspect, run_start};
use concord::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/concord.toml"));

    match cli.command {
        Commands::Start(_args) => run_start(&config_path, cli.log_level.as_deref()).await,
        Commands::Config(args) => run_config(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}
