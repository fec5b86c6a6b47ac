//! Data models for stored records.

use std::fmt;

use serde::{Deserialize, Serialize};

use wm_types::{DatasetKind, FieldDef, Location, Observation, RecordId, RecordStatus};

/// The record tables held in the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Locations,
    Observations,
}

impl Table {
    /// All tables, in creation order.
    pub const ALL: [Table; 2] = [Table::Locations, Table::Observations];

    /// SQL table name.
    pub const fn name(self) -> &'static str {
        match self {
            Table::Locations => "locations",
            Table::Observations => "observations",
        }
    }

    /// Attribute columns, typed with the field type conversion table.
    pub fn fields(self) -> Vec<FieldDef> {
        match self {
            Table::Locations => Location::fields(),
            Table::Observations => Observation::fields(),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<DatasetKind> for Table {
    fn from(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Locations => Table::Locations,
            DatasetKind::Observations => Table::Observations,
        }
    }
}

/// A row read from or written to a record table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum Record {
    Location(Location),
    Observation(Observation),
}

impl Record {
    pub fn id(&self) -> RecordId {
        match self {
            Record::Location(l) => l.id,
            Record::Observation(o) => o.id,
        }
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            Record::Location(l) => l.status,
            Record::Observation(o) => o.status,
        }
    }

    /// The table this record belongs in.
    pub fn table(&self) -> Table {
        match self {
            Record::Location(_) => Table::Locations,
            Record::Observation(_) => Table::Observations,
        }
    }

    pub fn as_location(&self) -> Option<&Location> {
        match self {
            Record::Location(l) => Some(l),
            Record::Observation(_) => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match self {
            Record::Observation(o) => Some(o),
            Record::Location(_) => None,
        }
    }
}

impl From<Location> for Record {
    fn from(l: Location) -> Self {
        Record::Location(l)
    }
}

impl From<Observation> for Record {
    fn from(o: Observation) -> Self {
        Record::Observation(o)
    }
}

/// How many rows a collected-state change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectScope {
    /// Only the given id.
    Single,
    /// Every row in the table (the id is ignored), e.g. to reset a run.
    All,
}

/// Outcome of mirroring a remote feature table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSummary {
    /// Rows inserted or refreshed.
    pub upserted: usize,
    /// Features that could not be converted and were skipped.
    pub skipped: usize,
    /// Features whose id matched a pending local row, left untouched.
    pub kept: usize,
}
