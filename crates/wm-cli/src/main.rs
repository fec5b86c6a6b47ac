use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wm_core::{Config, default_config_path};

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Quiet mode suppresses info-level logging.
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("wm=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wm=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Config { action } => commands::cmd_config(action, &config_path),
        Commands::Run { manual_ready } => {
            commands::cmd_run(load_config(&config_path)?, &config_path, manual_ready).await
        }
        Commands::Locations { format } => {
            commands::cmd_locations(&load_config(&config_path)?, format)
        }
        Commands::Observations {
            location,
            pending,
            limit,
            format,
        } => commands::cmd_observations(
            &load_config(&config_path)?,
            location,
            pending,
            limit,
            format,
        ),
        Commands::Export { output, location } => {
            commands::cmd_export(&load_config(&config_path)?, output.as_deref(), location)
        }
    }
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(Config::default())
    }
}
