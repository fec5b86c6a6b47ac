//! Message types carried on the [`EventBus`](crate::EventBus).
//!
//! Dataset and edit messages are published on the session channel with
//! [`EventBus::publish_on`](crate::EventBus::publish_on). Connectivity
//! changes concern the whole process and are published unchanneled.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use wm_types::{DatasetKind, FeatureTable, Position, RecordId};

use crate::bus::Channel;

/// Network reachability as seen by the connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Available,
    Unavailable,
}

impl Connectivity {
    pub fn is_available(self) -> bool {
        self == Connectivity::Available
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Available => write!(f, "available"),
            Connectivity::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Request to fetch (or refresh) a remote dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRequest {
    /// Dataset name, used for progress reporting and the local table name.
    pub name: String,
    pub kind: DatasetKind,
    /// Channel the result is published on.
    pub channel: Channel,
    pub url: String,
    /// Ignore any cached copy and download again.
    pub force_refresh: bool,
}

/// A dataset finished loading.
#[derive(Debug, Clone)]
pub struct DatasetReady {
    pub kind: DatasetKind,
    pub channel: Channel,
    pub table: Arc<FeatureTable>,
}

/// A dataset could not be loaded. Terminal for that request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetUnavailable {
    pub kind: DatasetKind,
    pub channel: Channel,
    pub reason: String,
}

/// Transfer progress of a dataset request.
///
/// `percent == 100` means the transfer completed, not that the data has
/// been mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetProgress {
    pub name: String,
    pub kind: DatasetKind,
    pub channel: Channel,
    pub percent: u8,
}

/// Kind of edit propagated to the remote dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    Add,
    Update,
    Delete,
}

impl fmt::Display for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditOp::Add => write!(f, "add"),
            EditOp::Update => write!(f, "update"),
            EditOp::Delete => write!(f, "delete"),
        }
    }
}

/// The remote dataset persisted an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAcknowledged {
    pub dataset: DatasetKind,
    pub op: EditOp,
    /// Local record id the edit was sent for.
    pub id: RecordId,
    /// Id the remote stored the feature under. Equal to `id` except for
    /// adds of locally numbered records.
    pub assigned_id: RecordId,
    pub channel: Channel,
}

/// The remote dataset refused or failed an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRejected {
    pub dataset: DatasetKind,
    pub op: EditOp,
    pub id: RecordId,
    pub channel: Channel,
    pub reason: String,
}

/// A local edit is being propagated to the remote dataset.
///
/// Published once per edit, at the moment the coordinator hands it to the
/// remote adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    pub dataset: DatasetKind,
    pub op: EditOp,
    pub id: RecordId,
    pub channel: Channel,
}

/// Network reachability changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChanged {
    pub connectivity: Connectivity,
}

/// Crossing direction of a geofence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceEventKind {
    Entered,
    Exited,
}

/// A position update crossed a fence boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceEvent {
    pub channel: Channel,
    /// Name the fence set was registered under.
    pub fence_name: String,
    /// Record id of the source geometry that triggered.
    pub record_id: RecordId,
    pub kind: FenceEventKind,
    /// The fix that caused the crossing.
    pub position: Position,
}

/// The consumer is ready to receive session updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReady;

/// Query for the table a session currently treats as authoritative.
///
/// Answered with `Option<Arc<FeatureTable>>` through
/// [`EventBus::request`](crate::EventBus::request) on the session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentDataset {
    pub kind: DatasetKind,
}
