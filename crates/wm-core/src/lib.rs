//! Offline-first sync engine for geofenced water measurement collection.
//!
//! A field crew walks between sampling locations and records Secchi depth
//! observations. This crate keeps a local cache of the location and
//! observation datasets in step with a remote feature service, tells the
//! consumer which location the device is at, and propagates local edits
//! once the session is running.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`bus`] | In-process typed publish/subscribe with channels |
//! | [`records`] | Async facade over the SQLite cache with status codes |
//! | [`remote`] | Remote dataset adapter trait and an in-memory mock |
//! | [`geofence`] | Enter/exit detection around location geometries |
//! | [`machine`] | Pure synchronization state machine |
//! | [`coordinator`] | Runtime driving the machine from bus messages |
//! | [`consumer`] | Bounded update queue for the UI |
//! | [`connectivity`] | Reachability probing |
//! | [`config`] | TOML configuration with validation |
//!
//! With the `http` feature, `HttpRemote` talks to a JSON feature
//! service over HTTP.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wm_core::{
//!     Config, DatasetKind, EventBus, FeatureTable, GeofenceMonitor, Location, MockRemote,
//!     Observation, RecordStore, Services, StaticProbe, SyncCoordinator, SyncState,
//! };
//! use wm_core::messages::Connectivity;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(EventBus::new());
//!     let remote = MockRemote::new(Arc::clone(&bus))
//!         .with_dataset(
//!             DatasetKind::Locations,
//!             FeatureTable::new("secchi_locations", Location::fields()),
//!         )
//!         .with_dataset(
//!             DatasetKind::Observations,
//!             FeatureTable::new("secchi_observations", Observation::fields()),
//!         );
//!     let services = Services {
//!         store: RecordStore::in_memory()?,
//!         remote: Arc::new(remote),
//!         geofence: Arc::new(GeofenceMonitor::new(Arc::clone(&bus))),
//!         probe: Arc::new(StaticProbe::new(Connectivity::Available)),
//!         bus,
//!     };
//!
//!     let (sync, mut updates) = SyncCoordinator::start(&Config::default(), services)?;
//!     tokio::spawn(async move {
//!         while let Some(update) = updates.recv().await {
//!             println!("{update:?}");
//!         }
//!     });
//!
//!     sync.wait_for_state(SyncState::HaveBoth).await?;
//!     sync.consumer_ready();
//!     sync.wait_for_state(SyncState::Running).await?;
//!     sync.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod connectivity;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod geofence;
#[cfg(feature = "http")]
pub mod http;
pub mod machine;
pub mod messages;
pub mod records;
pub mod remote;

pub use bus::{Channel, EventBus, OwnerId, Request, Subscription};
pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use connectivity::{ConnectivityMonitor, NetworkProbe, StaticProbe, TcpProbe};
pub use consumer::{ConsumerEvent, ConsumerQueue};
pub use coordinator::{Services, SyncCoordinator};
pub use error::{Error, Result};
pub use geofence::{FenceSource, GeofenceMonitor};
#[cfg(feature = "http")]
pub use http::HttpRemote;
pub use machine::{Effect, SyncMachine, SyncState, Transition, Trigger};
pub use messages::DatasetRequest;
pub use records::{RecordStore, StoreResult, StoreStatus};
pub use remote::{MockRemote, RecordedEdit, RemoteDataset};

// Re-export the data model and cache types used in this crate's API.
pub use wm_store::{CollectScope, MirrorSummary, Record, Table};
pub use wm_types::{
    DatasetKind, Feature, FeatureTable, Geometry, Location, Observation, Point, Position, RecordId,
};
