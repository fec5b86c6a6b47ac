//! Cache commands - query the local record store without a session.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use time::format_description::well_known::Rfc3339;
use wm_core::Config;
use wm_store::{ObservationQuery, Store};
use wm_types::{Location, Observation, RecordId, RecordStatus};

use crate::cli::OutputFormat;

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.storage.path).with_context(|| {
        format!("Failed to open database {}", config.storage.path.display())
    })
}

/// List cached locations.
pub fn cmd_locations(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config)?;
    let locations = store.list_locations()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&locations)?),
        OutputFormat::Text => {
            if locations.is_empty() {
                println!("No locations in cache. Run 'wm run' to download them.");
                return Ok(());
            }
            for location in &locations {
                println!("{}", format_location(location));
            }
        }
    }
    Ok(())
}

/// List cached observations, newest first.
pub fn cmd_observations(
    config: &Config,
    location: Option<RecordId>,
    pending: bool,
    limit: u32,
    format: OutputFormat,
) -> Result<()> {
    let store = open_store(config)?;
    let query = build_query(location, pending).limit(limit);
    let observations = store.query_observations(&query)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&observations)?),
        OutputFormat::Text => {
            if observations.is_empty() {
                println!("No matching observations.");
                return Ok(());
            }
            for obs in &observations {
                println!("{}", format_observation(obs)?);
            }
        }
    }
    Ok(())
}

/// Export cached observations as CSV.
pub fn cmd_export(
    config: &Config,
    output: Option<&Path>,
    location: Option<RecordId>,
) -> Result<()> {
    let store = open_store(config)?;
    let query = build_query(location, false).oldest_first();

    let rows = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let rows = store.export_observations_csv(&query, &mut writer)?;
            writer.flush()?;
            eprintln!("Exported {} observations to {}", rows, path.display());
            rows
        }
        None => store.export_observations_csv(&query, std::io::stdout().lock())?,
    };
    tracing::debug!("CSV export wrote {} rows", rows);
    Ok(())
}

fn build_query(location: Option<RecordId>, pending: bool) -> ObservationQuery {
    let mut query = ObservationQuery::new();
    if let Some(id) = location {
        query = query.location(id);
    }
    if pending {
        query = query.status(RecordStatus::WorkingSet);
    }
    query
}

fn format_location(location: &Location) -> String {
    format!(
        "{:>6}  {:<24} {:>10.5} {:>11.5}  {} {}",
        location.id,
        location.name,
        location.latitude,
        location.longitude,
        location.collected,
        pending_marker(location.status),
    )
}

fn format_observation(obs: &Observation) -> Result<String> {
    Ok(format!(
        "{}  location {:>4}  secchi {:>5.2}  {}",
        obs.collected_at.format(&Rfc3339)?,
        obs.location_id,
        obs.secchi,
        pending_marker(obs.status),
    ))
}

fn pending_marker(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::WorkingSet => "(pending)",
        RecordStatus::Committed => "",
    }
}
