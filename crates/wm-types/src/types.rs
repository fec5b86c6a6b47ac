//! Core record types: sampling locations and Secchi observations.

use core::fmt;
use core::str::FromStr;

use time::OffsetDateTime;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::feature::{Feature, FieldDef, FieldType, FieldValue};
use crate::geometry::{Geometry, Point};

/// Integer primary key shared by every record table.
pub type RecordId = i64;

/// Maximum number of raw depth readings per observation.
pub const MAX_MEASUREMENTS: usize = 3;

/// Attribute names used in the remote feature tables.
pub mod fields {
    pub const LOCATION_ID: &str = "LocationId";
    pub const LOCATION_NAME: &str = "LocationName";
    pub const LOCATION_TYPE: &str = "LocationType";
    pub const COLLECTED: &str = "Collected";
    pub const LATITUDE: &str = "Latitude";
    pub const LONGITUDE: &str = "Longitude";
    pub const GLOBAL_ID: &str = "GlobalID";
    pub const SECCHI_1: &str = "Secchi1";
    pub const SECCHI_2: &str = "Secchi2";
    pub const SECCHI_3: &str = "Secchi3";
    pub const SECCHI: &str = "Secchi";
    pub const DATE_COLLECTED: &str = "DateCollected";
}

/// Local reconciliation state of a record.
///
/// Every record starts as [`RecordStatus::WorkingSet`] and only becomes
/// [`RecordStatus::Committed`] once the remote dataset confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecordStatus {
    /// Visible locally, not yet acknowledged remotely.
    #[default]
    WorkingSet,
    /// Acknowledged by the sync layer.
    Committed,
}

/// Whether a location has been sampled in the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollectionStatus {
    #[default]
    NotCollected,
    Collected,
    Error,
}

/// Whether a location is revisited every run or sampled once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LocationKind {
    #[default]
    Recurring,
    OneOff,
}

/// Which of the two synchronized datasets a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DatasetKind {
    Observations,
    Locations,
}

macro_rules! label_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable label used in storage and on the wire.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($ty::$variant),)+
                    other => Err(ParseError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

label_enum!(RecordStatus, "record status", {
    WorkingSet => "WorkingSet",
    Committed => "Committed",
});

label_enum!(CollectionStatus, "collection status", {
    NotCollected => "NotCollected",
    Collected => "Collected",
    Error => "Error",
});

label_enum!(LocationKind, "location kind", {
    Recurring => "Recurring",
    OneOff => "OneOff",
});

label_enum!(DatasetKind, "dataset kind", {
    Observations => "Observations",
    Locations => "Locations",
});

/// Arithmetic mean of the raw readings, rounded to the nearest whole unit.
///
/// Halves round away from zero.
///
/// ```
/// use wm_types::secchi_mean;
///
/// assert_eq!(secchi_mean(&[4.0, 5.0, 6.0]).unwrap(), 5.0);
/// assert_eq!(secchi_mean(&[1.0, 2.0]).unwrap(), 2.0);
/// assert!(secchi_mean(&[]).is_err());
/// ```
pub fn secchi_mean(measurements: &[f64]) -> ParseResult<f64> {
    validate_measurements(measurements)?;
    let mean = measurements.iter().sum::<f64>() / measurements.len() as f64;
    Ok(mean.round())
}

fn validate_measurements(measurements: &[f64]) -> ParseResult<()> {
    if measurements.is_empty() || measurements.len() > MAX_MEASUREMENTS {
        return Err(ParseError::MeasurementCount(measurements.len()));
    }
    if let Some(index) = measurements.iter().position(|m| !m.is_finite()) {
        return Err(ParseError::NonFiniteMeasurement { index });
    }
    Ok(())
}

/// A sampling location.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Location {
    /// Unique location id.
    pub id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    /// Display name.
    pub name: String,
    pub kind: LocationKind,
    pub collected: CollectionStatus,
    pub status: RecordStatus,
}

impl Location {
    /// Create a new, uncollected, working-set location.
    ///
    /// # Panics
    ///
    /// Panics on a negative id or an empty name.
    pub fn new(id: RecordId, latitude: f64, longitude: f64, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(id >= 0, "location id must be non-negative, got {id}");
        assert!(!name.trim().is_empty(), "location name must not be empty");
        Self {
            id,
            latitude,
            longitude,
            name,
            kind: LocationKind::default(),
            collected: CollectionStatus::default(),
            status: RecordStatus::default(),
        }
    }

    /// Builder-style kind setter.
    #[must_use]
    pub fn with_kind(mut self, kind: LocationKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn point(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }

    /// Column layout of the locations table.
    #[must_use]
    pub fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new(fields::LOCATION_ID, FieldType::Int32),
            FieldDef::new(fields::LATITUDE, FieldType::Float64),
            FieldDef::new(fields::LONGITUDE, FieldType::Float64),
            FieldDef::new(fields::LOCATION_NAME, FieldType::Text),
            FieldDef::new(fields::LOCATION_TYPE, FieldType::Text),
            FieldDef::new(fields::COLLECTED, FieldType::Text),
        ]
    }

    /// Convert a remote feature into a location.
    ///
    /// Coordinates come from the point geometry when present, otherwise
    /// from the latitude/longitude attributes. Remote rows are committed.
    pub fn from_feature(feature: &Feature) -> ParseResult<Self> {
        let id = feature.get_i64(fields::LOCATION_ID)?;
        if id < 0 {
            return Err(ParseError::invalid_data(format!("negative location id {id}")));
        }
        let point = match feature.geometry.as_ref().and_then(Geometry::centroid) {
            Some(p) => p,
            None => Point::new(
                feature.get_f64(fields::LATITUDE)?,
                feature.get_f64(fields::LONGITUDE)?,
            ),
        };
        let kind = match feature.attributes.get(fields::LOCATION_TYPE) {
            Some(FieldValue::Text(s)) => s.parse()?,
            _ => LocationKind::default(),
        };
        let collected = match feature.attributes.get(fields::COLLECTED) {
            Some(FieldValue::Text(s)) => s.parse()?,
            _ => CollectionStatus::default(),
        };
        Ok(Self {
            id,
            latitude: point.latitude,
            longitude: point.longitude,
            name: feature.get_str(fields::LOCATION_NAME)?.to_string(),
            kind,
            collected,
            status: RecordStatus::Committed,
        })
    }

    /// Convert to a feature for remote propagation.
    #[must_use]
    pub fn to_feature(&self) -> Feature {
        Feature::new(self.id, Some(Geometry::Point(self.point())))
            .with(fields::LOCATION_ID, self.id)
            .with(fields::LATITUDE, self.latitude)
            .with(fields::LONGITUDE, self.longitude)
            .with(fields::LOCATION_NAME, self.name.as_str())
            .with(fields::LOCATION_TYPE, self.kind.as_str())
            .with(fields::COLLECTED, self.collected.as_str())
    }
}

/// A Secchi depth observation at a location.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    /// Object id. Zero until stored, negative while only held locally,
    /// and the provider's id once the remote dataset acknowledges it.
    pub id: RecordId,
    pub global_id: Uuid,
    /// One to three raw depth readings.
    pub measurements: Vec<f64>,
    /// Rounded mean of `measurements`.
    pub secchi: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub collected_at: OffsetDateTime,
    pub latitude: f64,
    pub longitude: f64,
    /// Reference to [`Location::id`].
    pub location_id: RecordId,
    pub status: RecordStatus,
}

impl Observation {
    /// Build a working-set observation, deriving the Secchi value.
    ///
    /// # Errors
    ///
    /// Fails unless there are between one and three finite measurements.
    pub fn new(
        location_id: RecordId,
        measurements: &[f64],
        at: Point,
        collected_at: OffsetDateTime,
    ) -> ParseResult<Self> {
        let secchi = secchi_mean(measurements)?;
        Ok(Self {
            id: 0,
            global_id: Uuid::new_v4(),
            measurements: measurements.to_vec(),
            secchi,
            collected_at,
            latitude: at.latitude,
            longitude: at.longitude,
            location_id,
            status: RecordStatus::WorkingSet,
        })
    }

    #[must_use]
    pub fn point(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }

    /// Column layout of the observations table.
    #[must_use]
    pub fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new(fields::GLOBAL_ID, FieldType::Guid),
            FieldDef::new(fields::SECCHI_1, FieldType::Float64),
            FieldDef::new(fields::SECCHI_2, FieldType::Float64),
            FieldDef::new(fields::SECCHI_3, FieldType::Float64),
            FieldDef::new(fields::SECCHI, FieldType::Float64),
            FieldDef::new(fields::DATE_COLLECTED, FieldType::Date),
            FieldDef::new(fields::LATITUDE, FieldType::Float64),
            FieldDef::new(fields::LONGITUDE, FieldType::Float64),
            FieldDef::new(fields::LOCATION_ID, FieldType::Int32),
        ]
    }

    /// Convert a remote feature into an observation. Remote rows are committed.
    pub fn from_feature(feature: &Feature) -> ParseResult<Self> {
        let measurements = [fields::SECCHI_1, fields::SECCHI_2, fields::SECCHI_3]
            .iter()
            .map(|name| feature.get_opt_f64(name))
            .collect::<ParseResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        validate_measurements(&measurements)?;

        let secchi = match feature.get_opt_f64(fields::SECCHI)? {
            Some(v) => v,
            None => secchi_mean(&measurements)?,
        };
        let point = match feature.geometry.as_ref().and_then(Geometry::centroid) {
            Some(p) => p,
            None => Point::new(
                feature.get_f64(fields::LATITUDE)?,
                feature.get_f64(fields::LONGITUDE)?,
            ),
        };
        let global_id = match feature.attributes.get(fields::GLOBAL_ID) {
            Some(_) => feature.get_guid(fields::GLOBAL_ID)?,
            None => Uuid::new_v4(),
        };

        Ok(Self {
            id: feature.object_id,
            global_id,
            measurements,
            secchi,
            collected_at: feature.get_date(fields::DATE_COLLECTED)?,
            latitude: point.latitude,
            longitude: point.longitude,
            location_id: feature.get_i64(fields::LOCATION_ID)?,
            status: RecordStatus::Committed,
        })
    }

    /// Convert to a feature for remote propagation.
    #[must_use]
    pub fn to_feature(&self) -> Feature {
        let mut feature = Feature::new(self.id, Some(Geometry::Point(self.point())))
            .with(fields::GLOBAL_ID, self.global_id)
            .with(fields::SECCHI, self.secchi)
            .with(fields::DATE_COLLECTED, self.collected_at)
            .with(fields::LATITUDE, self.latitude)
            .with(fields::LONGITUDE, self.longitude)
            .with(fields::LOCATION_ID, self.location_id);
        for (name, value) in [fields::SECCHI_1, fields::SECCHI_2, fields::SECCHI_3]
            .iter()
            .zip(&self.measurements)
        {
            feature = feature.with(name, *value);
        }
        feature
    }
}
