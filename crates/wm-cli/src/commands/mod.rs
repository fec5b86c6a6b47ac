//! Command implementations for the CLI.

mod cache;
mod config;
mod run;

pub use cache::{cmd_export, cmd_locations, cmd_observations};
pub use config::cmd_config;
pub use run::cmd_run;
