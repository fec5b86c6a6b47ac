//! Run command - drive a sync session from stdin.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

use wm_core::{
    Config, ConsumerEvent, DatasetKind, EventBus, FeatureTable, GeofenceMonitor, HttpRemote,
    Location, MockRemote, Point, Position, RecordId, RecordStore, RemoteDataset, Services,
    SyncCoordinator, SyncState, TcpProbe,
};

/// A line typed by the operator.
#[derive(Debug, Clone, PartialEq)]
enum FieldCommand {
    Position(Position),
    Submit(Vec<f64>),
    Add(Location),
    Delete(RecordId),
    Refresh(DatasetKind),
    Ready,
    Status,
    Quit,
}

/// Execute the run command.
pub async fn cmd_run(config: Config, config_path: &Path, manual_ready: bool) -> Result<()> {
    config.validate()?;

    let bus = Arc::new(EventBus::new());
    let remote = build_remote(&config, &bus)?;
    let store = RecordStore::open(&config.storage.path).with_context(|| {
        format!("Failed to open database {}", config.storage.path.display())
    })?;
    let probe = TcpProbe::new(
        config.connectivity.probe.clone(),
        config.connectivity.timeout(),
    );
    let services = Services {
        store,
        remote,
        geofence: Arc::new(GeofenceMonitor::new(Arc::clone(&bus))),
        probe: Arc::new(probe),
        bus,
    };

    let (sync, updates) = SyncCoordinator::start(&config, services)?;
    info!("Session started on {}", sync.channel());

    let printer = tokio::spawn(print_updates(updates, sync.clone(), manual_ready));

    if !config.app.initialized {
        let sync = sync.clone();
        let path = config_path.to_path_buf();
        let mut config = config.clone();
        tokio::spawn(async move {
            if sync.wait_for_state(SyncState::Running).await.is_ok() {
                config.app.initialized = true;
                if let Err(e) = config.save(&path) {
                    warn!("Failed to record first run: {}", e);
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(FieldCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = execute(&sync, command).await {
                            eprintln!("Error: {}", e);
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
    }

    sync.shutdown().await?;
    printer.await.context("update printer panicked")?;
    Ok(())
}

/// Pick the remote adapter from the configured URLs.
///
/// Both datasets must come from the same kind of source.
fn build_remote(config: &Config, bus: &Arc<EventBus>) -> Result<Arc<dyn RemoteDataset>> {
    let remote = &config.remote;
    let observations = remote.url(DatasetKind::Observations);
    let locations = remote.url(DatasetKind::Locations);

    match (fixture_path(observations), fixture_path(locations)) {
        (Some(obs_path), Some(loc_path)) => Ok(Arc::new(fixture_remote(
            bus,
            Path::new(obs_path),
            Path::new(loc_path),
        )?)),
        (None, None) => Ok(Arc::new(HttpRemote::new(
            Arc::clone(bus),
            observations,
            locations,
        )?)),
        _ => bail!("Dataset URLs must both be file:// or both be http(s)://"),
    }
}

/// Serve both datasets from JSON files. Nothing is uploaded, so edits are
/// never acknowledged and stay pending in the local store.
fn fixture_remote(
    bus: &Arc<EventBus>,
    observations: &Path,
    locations: &Path,
) -> Result<MockRemote> {
    info!("Serving datasets from local files; edits stay pending locally");
    let mock = MockRemote::new(Arc::clone(bus))
        .with_dataset(DatasetKind::Observations, load_fixture(observations)?)
        .with_dataset(DatasetKind::Locations, load_fixture(locations)?);
    mock.set_read_only(true);
    Ok(mock)
}

fn fixture_path(url: &str) -> Option<&str> {
    url.strip_prefix("file://")
}

/// Read a feature table saved as JSON.
fn load_fixture(path: &Path) -> Result<FeatureTable> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse dataset {}", path.display()))
}

async fn print_updates(
    mut updates: Receiver<ConsumerEvent>,
    sync: SyncCoordinator,
    manual_ready: bool,
) {
    while let Some(update) = updates.recv().await {
        match update {
            ConsumerEvent::StateChanged { from, to } => println!("state: {} -> {}", from, to),
            ConsumerEvent::ReadyRequested => {
                if manual_ready {
                    println!("datasets loaded; type 'ready' to start");
                } else {
                    sync.consumer_ready();
                }
            }
            ConsumerEvent::DatasetProgress { kind, percent } => {
                println!("{}: {}%", kind, percent)
            }
            ConsumerEvent::LocationEntered(location) => {
                println!("entered {} ({})", location.name, location.id)
            }
            ConsumerEvent::LocationExited(id) => println!("left location {}", id),
            ConsumerEvent::ObservationCreated(obs) => println!(
                "observation {} at location {}: secchi {}",
                obs.global_id, obs.location_id, obs.secchi
            ),
            ConsumerEvent::LocationDeleted(id) => println!("location {} deleted", id),
            ConsumerEvent::Connectivity(c) => println!("network {}", c),
            ConsumerEvent::Error(message) => eprintln!("sync error: {}", message),
        }
    }
}

async fn execute(sync: &SyncCoordinator, command: FieldCommand) -> Result<()> {
    match command {
        FieldCommand::Position(position) => {
            let events = sync.update_position(position).await?;
            if events.is_empty() {
                println!("ok");
            }
        }
        FieldCommand::Submit(measurements) => {
            let obs = sync.submit_observation(&measurements).await?;
            println!("saved observation {}", obs.global_id);
        }
        FieldCommand::Add(location) => sync.add_location(location).await?,
        FieldCommand::Delete(id) => sync.delete_location(id).await?,
        FieldCommand::Refresh(kind) => sync.refresh(kind)?,
        FieldCommand::Ready => sync.consumer_ready(),
        FieldCommand::Status => {
            println!("state: {}", sync.state());
            match sync.active_location().await? {
                Some(location) => println!("at: {} ({})", location.name, location.id),
                None => println!("at: no location"),
            }
        }
        FieldCommand::Quit => {}
    }
    Ok(())
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
fn parse_command(line: &str) -> Result<Option<FieldCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let command = match verb {
        "pos" | "position" => {
            if !(2..=3).contains(&args.len()) {
                bail!("usage: pos <lat> <lon> [accuracy]");
            }
            let point = Point::new(
                parse_f64(args[0], "latitude")?,
                parse_f64(args[1], "longitude")?,
            );
            if !point.is_valid() {
                bail!("coordinate out of range: {}, {}", point.latitude, point.longitude);
            }
            let mut position = Position::now(point);
            if let Some(acc) = args.get(2) {
                position.accuracy = Some(parse_f64(acc, "accuracy")?);
            }
            FieldCommand::Position(position)
        }
        "submit" => {
            if args.is_empty() {
                bail!("usage: submit <m1> [m2] [m3]");
            }
            let measurements = args
                .iter()
                .map(|a| parse_f64(a, "measurement"))
                .collect::<Result<Vec<_>>>()?;
            FieldCommand::Submit(measurements)
        }
        "add" => {
            if args.len() < 4 {
                bail!("usage: add <id> <lat> <lon> <name>");
            }
            let id = parse_id(args[0])?;
            let latitude = parse_f64(args[1], "latitude")?;
            let longitude = parse_f64(args[2], "longitude")?;
            let name = args[3..].join(" ");
            FieldCommand::Add(Location::new(id, latitude, longitude, name))
        }
        "delete" | "rm" => match args.as_slice() {
            [id] => FieldCommand::Delete(parse_id(id)?),
            _ => bail!("usage: delete <id>"),
        },
        "refresh" => match args.as_slice() {
            [kind] => FieldCommand::Refresh(parse_kind(kind)?),
            _ => bail!("usage: refresh <observations|locations>"),
        },
        "ready" => FieldCommand::Ready,
        "status" => FieldCommand::Status,
        "quit" | "exit" => FieldCommand::Quit,
        other => bail!("unknown command '{}'", other),
    };
    Ok(Some(command))
}

fn parse_f64(value: &str, what: &str) -> Result<f64> {
    let parsed: f64 = value
        .parse()
        .with_context(|| format!("invalid {}: '{}'", what, value))?;
    if !parsed.is_finite() {
        bail!("invalid {}: '{}'", what, value);
    }
    Ok(parsed)
}

fn parse_id(value: &str) -> Result<RecordId> {
    let id: RecordId = value
        .parse()
        .with_context(|| format!("invalid location id: '{}'", value))?;
    if id < 0 {
        bail!("location id must be non-negative, got {}", id);
    }
    Ok(id)
}

fn parse_kind(value: &str) -> Result<DatasetKind> {
    match value.to_ascii_lowercase().as_str() {
        "observations" | "obs" => Ok(DatasetKind::Observations),
        "locations" | "loc" => Ok(DatasetKind::Locations),
        _ => bail!("unknown dataset '{}': expected observations or locations", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wm_core::Observation;

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("# walking to the dock").unwrap(), None);
    }

    #[test]
    fn test_parse_position() {
        let Some(FieldCommand::Position(p)) = parse_command("pos 44.9 -93.2 4.5").unwrap() else {
            panic!("expected a position");
        };
        assert_eq!(p.point, Point::new(44.9, -93.2));
        assert_eq!(p.accuracy, Some(4.5));

        assert!(parse_command("pos 44.9").is_err());
        assert!(parse_command("pos 95 0").is_err());
        assert!(parse_command("pos abc 0").is_err());
    }

    #[test]
    fn test_parse_submit() {
        assert_eq!(
            parse_command("submit 4.5 5 5.5").unwrap(),
            Some(FieldCommand::Submit(vec![4.5, 5.0, 5.5]))
        );
        assert!(parse_command("submit").is_err());
        assert!(parse_command("submit NaN").is_err());
    }

    #[test]
    fn test_parse_add_joins_name() {
        let Some(FieldCommand::Add(location)) =
            parse_command("add 12 45.0 -93.0 North Bay buoy").unwrap()
        else {
            panic!("expected an add");
        };
        assert_eq!(location.id, 12);
        assert_eq!(location.name, "North Bay buoy");

        assert!(parse_command("add -1 45 -93 Bad").is_err());
        assert!(parse_command("add 3 45 -93").is_err());
    }

    #[test]
    fn test_parse_refresh_is_case_insensitive() {
        assert_eq!(
            parse_command("refresh Locations").unwrap(),
            Some(FieldCommand::Refresh(DatasetKind::Locations))
        );
        assert_eq!(
            parse_command("refresh obs").unwrap(),
            Some(FieldCommand::Refresh(DatasetKind::Observations))
        );
        assert!(parse_command("refresh sites").is_err());
    }

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(parse_command("ready").unwrap(), Some(FieldCommand::Ready));
        assert_eq!(parse_command("status").unwrap(), Some(FieldCommand::Status));
        assert_eq!(parse_command("exit").unwrap(), Some(FieldCommand::Quit));
        assert_eq!(parse_command("delete 7").unwrap(), Some(FieldCommand::Delete(7)));
        assert!(parse_command("jump").is_err());
    }

    #[test]
    fn test_load_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        let mut table = FeatureTable::new("secchi_locations", Location::fields());
        table
            .features
            .push(Location::new(7, 44.9, -93.2, "Pier A").to_feature());
        std::fs::write(&path, serde_json::to_string(&table).unwrap()).unwrap();

        let loaded = load_fixture(&path).unwrap();
        assert_eq!(loaded, table);

        std::fs::write(&path, "not json").unwrap();
        assert!(load_fixture(&path).is_err());
        assert!(load_fixture(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_build_remote_rejects_mixed_sources() {
        let bus = Arc::new(EventBus::new());
        let mut config = Config::default();
        config.remote.observations_url = "file:///tmp/obs.json".into();
        assert!(build_remote(&config, &bus).is_err());
    }

    #[test]
    fn test_build_remote_from_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let obs = dir.path().join("obs.json");
        let loc = dir.path().join("loc.json");
        let write = |path: &Path, table: FeatureTable| {
            std::fs::write(path, serde_json::to_string(&table).unwrap()).unwrap();
        };
        write(&obs, FeatureTable::new("secchi_observations", Observation::fields()));
        write(&loc, FeatureTable::new("secchi_locations", Location::fields()));

        let bus = Arc::new(EventBus::new());
        let mut config = Config::default();
        config.remote.observations_url = format!("file://{}", obs.display());
        config.remote.locations_url = format!("file://{}", loc.display());
        assert!(build_remote(&config, &bus).is_ok());
    }

    #[tokio::test]
    async fn test_fixture_remote_never_acknowledges_edits() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use wm_core::messages::{FeatureAcknowledged, FeatureRejected};

        let dir = tempfile::tempdir().unwrap();
        let obs = dir.path().join("obs.json");
        let loc = dir.path().join("loc.json");
        let observations = FeatureTable::new("secchi_observations", Observation::fields());
        std::fs::write(&obs, serde_json::to_string(&observations).unwrap()).unwrap();
        let locations = FeatureTable::new("secchi_locations", Location::fields());
        std::fs::write(&loc, serde_json::to_string(&locations).unwrap()).unwrap();

        let bus = Arc::new(EventBus::new());
        let answers = Arc::new(AtomicUsize::new(0));
        let owner = bus.owner();
        let a = Arc::clone(&answers);
        bus.subscribe::<FeatureAcknowledged, _>(owner, Some(1), move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let a = Arc::clone(&answers);
        bus.subscribe::<FeatureRejected, _>(owner, Some(1), move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        let remote = fixture_remote(&bus, &obs, &loc).unwrap();
        let dock = Location::new(8, 45.0, -93.0, "Dock");
        remote
            .add_feature(DatasetKind::Locations, dock.to_feature(), 1)
            .await;

        assert_eq!(answers.load(Ordering::SeqCst), 0);
        assert_eq!(remote.edits().await.len(), 1);
    }
}
