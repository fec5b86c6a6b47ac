//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use wm_types::RecordId;

/// Output format for listing commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "wm")]
#[command(author, version, about = "Field client for Secchi depth collection", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "WM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a sync session, reading field commands from stdin
    ///
    /// Commands: `pos <lat> <lon> [accuracy]`, `submit <m1> [m2] [m3]`,
    /// `add <id> <lat> <lon> <name>`, `delete <id>`,
    /// `refresh <observations|locations>`, `ready`, `status`, `quit`.
    Run {
        /// Wait for an explicit `ready` instead of signalling readiness
        /// as soon as both datasets are loaded
        #[arg(long)]
        manual_ready: bool,
    },

    /// List cached locations
    Locations {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List cached observations, newest first
    Observations {
        /// Only observations for this location
        #[arg(short, long)]
        location: Option<RecordId>,

        /// Only observations not yet acknowledged remotely
        #[arg(long)]
        pending: bool,

        /// Maximum number of rows
        #[arg(short = 'n', long, default_value = "50")]
        limit: u32,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Export cached observations as CSV
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only observations for this location
        #[arg(short, long)]
        location: Option<RecordId>,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration
    Check,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
