//! Platform-agnostic data model for water measurement field collection.
//!
//! This crate provides the types shared by the local record store
//! (wm-store) and the synchronization engine (wm-core).
//!
//! # Features
//!
//! - Sampling [`Location`]s and Secchi depth [`Observation`]s
//! - Record reconciliation state ([`RecordStatus`])
//! - Remote [`FeatureTable`] shape and the field type conversion table
//! - Point/polygon geometry with haversine distance and a blob codec
//!
//! # Example
//!
//! ```
//! use wm_types::{Location, Observation, RecordStatus};
//! use time::OffsetDateTime;
//!
//! let pier = Location::new(7, 44.9, -93.2, "Pier A");
//! let obs = Observation::new(pier.id, &[4.0, 5.0, 6.0], pier.point(), OffsetDateTime::now_utc())?;
//! assert_eq!(obs.secchi, 5.0);
//! assert_eq!(obs.status, RecordStatus::WorkingSet);
//! # Ok::<(), wm_types::ParseError>(())
//! ```

pub mod error;
pub mod feature;
pub mod geometry;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use feature::{Feature, FeatureTable, FieldDef, FieldType, FieldValue, SqlType};
pub use geometry::{Geometry, Point, Position};
pub use types::{
    CollectionStatus, DatasetKind, Location, LocationKind, MAX_MEASUREMENTS, Observation,
    RecordId, RecordStatus, fields, secchi_mean,
};
