//! Config command - inspect and create the configuration file.

use std::path::Path;

use anyhow::{Result, bail};
use wm_core::Config;

use crate::cli::ConfigAction;

/// Execute a config subcommand.
pub fn cmd_config(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let config = load_or_default(path)?;
            print!("{}", toml_string(&config)?);
        }
        ConfigAction::Check => {
            let config = load_or_default(path)?;
            config.validate()?;
            println!("Configuration OK ({})", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        Ok(Config::default())
    }
}

fn toml_string(config: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
