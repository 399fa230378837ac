//! Config command implementation.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::core::config::Config;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/concord.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/concord.toml")]
        config: PathBuf,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config } => show_config(&config),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    Config::from_file(path)?;
    println!("ok: {}", path.display());
    Ok(())
}

fn show_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = toml::to_string_pretty(&config).context("rendering config")?;
    print!("{rendered}");
    Ok(())
}
