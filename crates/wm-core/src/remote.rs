//! Remote dataset adapter.
//!
//! A [`RemoteDataset`] fetches the authoritative feature tables and
//! forwards local edits. Every call reports its outcome on the
//! [`EventBus`] instead of returning it, scoped to the caller's channel:
//!
//! - [`DatasetProgress`] while a transfer runs, then exactly one of
//!   [`DatasetReady`] or [`DatasetUnavailable`]. A cancelled request
//!   publishes neither.
//! - [`FeatureAcknowledged`] or [`FeatureRejected`] for each edit.
//!
//! Adapters never retry. Deciding when to ask again is up to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wm_types::{DatasetKind, Feature, FeatureTable, RecordId};

use crate::bus::{Channel, EventBus};
use crate::messages::{
    DatasetProgress, DatasetReady, DatasetRequest, DatasetUnavailable, EditOp,
    FeatureAcknowledged, FeatureRejected,
};

/// Source of the remote feature tables.
///
/// # Example
///
/// ```ignore
/// use wm_core::{DatasetRequest, RemoteDataset};
/// use tokio_util::sync::CancellationToken;
///
/// async fn fetch<R: RemoteDataset>(remote: &R, request: DatasetRequest) {
///     // The table arrives on the bus as DatasetReady.
///     remote.request_dataset(request, CancellationToken::new()).await;
/// }
/// ```
#[async_trait]
pub trait RemoteDataset: Send + Sync {
    /// Fetch a dataset. Completes once the outcome has been published.
    async fn request_dataset(&self, request: DatasetRequest, cancel: CancellationToken);

    /// Add a feature to a dataset.
    async fn add_feature(&self, dataset: DatasetKind, feature: Feature, channel: Channel);

    /// Replace a feature in a dataset.
    async fn update_feature(&self, dataset: DatasetKind, feature: Feature, channel: Channel);

    /// Delete a feature by object id.
    async fn delete_feature(&self, dataset: DatasetKind, id: RecordId, channel: Channel);
}

/// Publish the outcome of an edit. `Ok` carries the id the remote stored
/// the feature under.
pub(crate) fn publish_edit_outcome(
    bus: &EventBus,
    dataset: DatasetKind,
    op: EditOp,
    id: RecordId,
    channel: Channel,
    outcome: std::result::Result<RecordId, String>,
) {
    match outcome {
        Ok(assigned_id) => {
            debug!(
                "Remote {} of {} {} acknowledged as {}",
                op, dataset, id, assigned_id
            );
            bus.publish_on(
                FeatureAcknowledged {
                    dataset,
                    op,
                    id,
                    assigned_id,
                    channel,
                },
                channel,
            );
        }
        Err(reason) => {
            warn!("Remote {} of {} {} rejected: {}", op, dataset, id, reason);
            bus.publish_on(
                FeatureRejected {
                    dataset,
                    op,
                    id,
                    channel,
                    reason,
                },
                channel,
            );
        }
    }
}

pub(crate) fn publish_unavailable(
    bus: &EventBus,
    request: &DatasetRequest,
    reason: impl Into<String>,
) {
    let reason = reason.into();
    warn!("Dataset {} unavailable: {}", request.name, reason);
    bus.publish_on(
        DatasetUnavailable {
            kind: request.kind,
            channel: request.channel,
            reason,
        },
        request.channel,
    );
}

pub(crate) fn publish_progress(bus: &EventBus, request: &DatasetRequest, percent: u8) {
    bus.publish_on(
        DatasetProgress {
            name: request.name.clone(),
            kind: request.kind,
            channel: request.channel,
            percent: percent.min(100),
        },
        request.channel,
    );
}

pub(crate) fn publish_ready(bus: &EventBus, request: &DatasetRequest, table: FeatureTable) {
    info!(
        "Dataset {} ready with {} feature(s)",
        request.name,
        table.len()
    );
    bus.publish_on(
        DatasetReady {
            kind: request.kind,
            channel: request.channel,
            table: Arc::new(table),
        },
        request.channel,
    );
}

/// An edit received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEdit {
    pub dataset: DatasetKind,
    pub op: EditOp,
    pub id: RecordId,
    pub channel: Channel,
}

/// In-memory remote dataset for tests and offline demos.
///
/// # Features
///
/// - **Failure injection**: go offline, or reject edits
/// - **Latency simulation**: delay each progress step
/// - **Edit log**: inspect every edit the adapter received
/// - **Read-only mode**: serve fixtures and leave edits unanswered
///
/// Adds of features with a non-positive id get the next free id, the way
/// a feature service assigns object ids. Adding an id that already exists
/// is rejected.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use wm_core::{EventBus, MockRemote};
/// use wm_types::{DatasetKind, FeatureTable, Location};
///
/// let bus = Arc::new(EventBus::new());
/// let mut locations = FeatureTable::new("secchi_locations", Location::fields());
/// locations.features.push(Location::new(7, 44.9, -93.2, "Pier A").to_feature());
///
/// let remote = MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations);
/// assert_eq!(remote.request_count(), 0);
/// ```
pub struct MockRemote {
    bus: Arc<EventBus>,
    datasets: RwLock<HashMap<DatasetKind, FeatureTable>>,
    edits: RwLock<Vec<RecordedEdit>>,
    offline: AtomicBool,
    reject_edits: AtomicBool,
    read_only: AtomicBool,
    /// Delay before each progress step in milliseconds (0 = no delay).
    step_latency_ms: AtomicU64,
    progress_steps: AtomicU32,
    request_count: AtomicU32,
    /// Number of requests to fail before succeeding.
    remaining_failures: AtomicU32,
}

impl std::fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("offline", &self.offline.load(Ordering::Relaxed))
            .field("request_count", &self.request_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockRemote {
    /// Create a mock with no datasets.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            datasets: RwLock::new(HashMap::new()),
            edits: RwLock::new(Vec::new()),
            offline: AtomicBool::new(false),
            reject_edits: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            step_latency_ms: AtomicU64::new(0),
            progress_steps: AtomicU32::new(4),
            request_count: AtomicU32::new(0),
            remaining_failures: AtomicU32::new(0),
        }
    }

    /// Builder-style dataset setter.
    pub fn with_dataset(mut self, kind: DatasetKind, table: FeatureTable) -> Self {
        self.datasets.get_mut().insert(kind, table);
        self
    }

    /// Replace a dataset.
    pub async fn set_dataset(&self, kind: DatasetKind, table: FeatureTable) {
        self.datasets.write().await.insert(kind, table);
    }

    /// Current contents of a dataset, including applied edits.
    pub async fn dataset(&self, kind: DatasetKind) -> Option<FeatureTable> {
        self.datasets.read().await.get(&kind).cloned()
    }

    /// Simulate losing the network: requests publish `DatasetUnavailable`
    /// and edits are rejected.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Reject every edit.
    pub fn set_reject_edits(&self, reject: bool) {
        self.reject_edits.store(reject, Ordering::Relaxed);
    }

    /// Record edits without applying or answering them, so local rows
    /// stay in the working set.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    /// Delay each progress step by `latency`.
    pub fn set_step_latency(&self, latency: Duration) {
        self.step_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of progress events per successful request (at least one).
    pub fn set_progress_steps(&self, steps: u32) {
        self.progress_steps.store(steps.max(1), Ordering::Relaxed);
    }

    /// Fail the next `count` dataset requests, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Number of dataset requests received.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Every edit received so far.
    pub async fn edits(&self) -> Vec<RecordedEdit> {
        self.edits.read().await.clone()
    }

    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn apply_edit(
        &self,
        dataset: DatasetKind,
        op: EditOp,
        id: RecordId,
        feature: Option<Feature>,
        channel: Channel,
    ) {
        self.edits.write().await.push(RecordedEdit {
            dataset,
            op,
            id,
            channel,
        });

        if self.read_only.load(Ordering::Relaxed) {
            debug!("Read-only remote leaves {} of {} {} pending", op, dataset, id);
            return;
        }

        let outcome = if self.offline.load(Ordering::Relaxed) {
            Err("remote unreachable".to_string())
        } else if self.reject_edits.load(Ordering::Relaxed) {
            Err("edit rejected by mock".to_string())
        } else {
            let mut datasets = self.datasets.write().await;
            let table = datasets
                .entry(dataset)
                .or_insert_with(|| FeatureTable::new(dataset.as_str(), Vec::new()));
            match (op, feature) {
                (EditOp::Delete, _) => {
                    let before = table.features.len();
                    table.features.retain(|f| f.object_id != id);
                    if table.features.len() == before {
                        Err(format!("no feature {id}"))
                    } else {
                        Ok(id)
                    }
                }
                (EditOp::Add, Some(mut feature)) => {
                    if feature.object_id <= 0 {
                        let highest = table.features.iter().map(|f| f.object_id).max();
                        feature.object_id = highest.unwrap_or(0).max(0) + 1;
                    }
                    let assigned = feature.object_id;
                    if table.feature(assigned).is_some() {
                        Err(format!("feature {assigned} already exists"))
                    } else {
                        table.features.push(feature);
                        Ok(assigned)
                    }
                }
                (EditOp::Update, Some(feature)) => {
                    match table.features.iter_mut().find(|f| f.object_id == id) {
                        Some(existing) => {
                            *existing = feature;
                            Ok(id)
                        }
                        None => Err(format!("no feature {id}")),
                    }
                }
                (_, None) => Err("missing feature payload".to_string()),
            }
        };

        publish_edit_outcome(&self.bus, dataset, op, id, channel, outcome);
    }
}

#[async_trait]
impl RemoteDataset for MockRemote {
    async fn request_dataset(&self, request: DatasetRequest, cancel: CancellationToken) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Mock request for {} ({}) on channel {}",
            request.name, request.kind, request.channel
        );

        if self.offline.load(Ordering::Relaxed) || self.take_failure() {
            publish_unavailable(&self.bus, &request, "remote unreachable");
            return;
        }

        let Some(table) = self.datasets.read().await.get(&request.kind).cloned() else {
            publish_unavailable(&self.bus, &request, format!("no dataset at {}", request.url));
            return;
        };

        let steps = self.progress_steps.load(Ordering::Relaxed).max(1);
        let latency = Duration::from_millis(self.step_latency_ms.load(Ordering::Relaxed));
        for step in 1..=steps {
            if !latency.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Request for {} cancelled", request.name);
                        return;
                    }
                    _ = tokio::time::sleep(latency) => {}
                }
            }
            if cancel.is_cancelled() {
                debug!("Request for {} cancelled", request.name);
                return;
            }
            let percent = (step * 100 / steps) as u8;
            publish_progress(&self.bus, &request, percent);
        }

        publish_ready(&self.bus, &request, table);
    }

    async fn add_feature(&self, dataset: DatasetKind, feature: Feature, channel: Channel) {
        let id = feature.object_id;
        self.apply_edit(dataset, EditOp::Add, id, Some(feature), channel)
            .await;
    }

    async fn update_feature(&self, dataset: DatasetKind, feature: Feature, channel: Channel) {
        let id = feature.object_id;
        self.apply_edit(dataset, EditOp::Update, id, Some(feature), channel)
            .await;
    }

    async fn delete_feature(&self, dataset: DatasetKind, id: RecordId, channel: Channel) {
        self.apply_edit(dataset, EditOp::Delete, id, None, channel)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wm_types::Location;

    fn request(kind: DatasetKind) -> DatasetRequest {
        DatasetRequest {
            name: "secchi_locations".into(),
            kind,
            channel: 1,
            url: "mock://locations".into(),
            force_refresh: false,
        }
    }

    fn locations() -> FeatureTable {
        let mut table = FeatureTable::new("secchi_locations", Location::fields());
        table
            .features
            .push(Location::new(7, 44.9, -93.2, "Pier A").to_feature());
        table
    }

    /// Record every message type the adapter publishes on channel 1.
    fn capture(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let owner = bus.owner();
        let l = Arc::clone(&log);
        bus.subscribe::<DatasetProgress, _>(owner, Some(1), move |p| {
            l.lock().unwrap().push(format!("progress {}", p.percent));
        });
        let l = Arc::clone(&log);
        bus.subscribe::<DatasetReady, _>(owner, Some(1), move |r| {
            l.lock().unwrap().push(format!("ready {}", r.table.len()));
        });
        let l = Arc::clone(&log);
        bus.subscribe::<DatasetUnavailable, _>(owner, Some(1), move |_| {
            l.lock().unwrap().push("unavailable".into());
        });
        let l = Arc::clone(&log);
        bus.subscribe::<FeatureAcknowledged, _>(owner, Some(1), move |a| {
            if a.assigned_id == a.id {
                l.lock().unwrap().push(format!("ack {} {}", a.op, a.id));
            } else {
                l.lock()
                    .unwrap()
                    .push(format!("ack {} {} as {}", a.op, a.id, a.assigned_id));
            }
        });
        let l = Arc::clone(&log);
        bus.subscribe::<FeatureRejected, _>(owner, Some(1), move |r| {
            l.lock().unwrap().push(format!("rejected {} {}", r.op, r.id));
        });
        log
    }

    #[tokio::test]
    async fn test_request_reports_progress_then_ready() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote =
            MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations());

        remote
            .request_dataset(request(DatasetKind::Locations), CancellationToken::new())
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["progress 25", "progress 50", "progress 75", "progress 100", "ready 1"]
        );
        assert_eq!(remote.request_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_dataset_is_unavailable() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote = MockRemote::new(Arc::clone(&bus));
        remote
            .request_dataset(request(DatasetKind::Observations), CancellationToken::new())
            .await;
        assert_eq!(*log.lock().unwrap(), vec!["unavailable"]);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote =
            MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations());
        remote.set_transient_failures(1);
        remote.set_progress_steps(1);

        remote
            .request_dataset(request(DatasetKind::Locations), CancellationToken::new())
            .await;
        remote
            .request_dataset(request(DatasetKind::Locations), CancellationToken::new())
            .await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["unavailable", "progress 100", "ready 1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_never_delivers_ready() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote = Arc::new(
            MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations()),
        );
        remote.set_step_latency(Duration::from_secs(1));

        let cancel = CancellationToken::new();
        let task = {
            let remote = Arc::clone(&remote);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                remote
                    .request_dataset(request(DatasetKind::Locations), cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        task.await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["progress 25", "progress 50"]);
    }

    #[tokio::test]
    async fn test_edits_are_applied_and_acknowledged() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote =
            MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations());

        let dock = Location::new(8, 45.0, -93.0, "Dock");
        remote
            .add_feature(DatasetKind::Locations, dock.to_feature(), 1)
            .await;
        remote.delete_feature(DatasetKind::Locations, 7, 1).await;
        remote.delete_feature(DatasetKind::Locations, 7, 1).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["ack add 8", "ack delete 7", "rejected delete 7"]
        );
        let table = remote.dataset(DatasetKind::Locations).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(remote.edits().await.len(), 3);
    }

    #[tokio::test]
    async fn test_offline_rejects_edits() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote = MockRemote::new(Arc::clone(&bus));
        remote.set_offline(true);
        remote.delete_feature(DatasetKind::Locations, 1, 1).await;
        assert_eq!(*log.lock().unwrap(), vec!["rejected delete 1"]);
    }

    #[tokio::test]
    async fn test_add_assigns_ids_and_refuses_duplicates() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote =
            MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations());

        // A locally numbered feature gets the next free id.
        let mut local = Location::new(8, 45.0, -93.0, "Dock").to_feature();
        local.object_id = -1;
        remote.add_feature(DatasetKind::Locations, local, 1).await;

        // An add must never silently replace an existing feature.
        let other = Location::new(7, 10.0, 10.0, "Elsewhere").to_feature();
        remote.add_feature(DatasetKind::Locations, other, 1).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["ack add -1 as 8", "rejected add 7"]
        );
        let table = remote.dataset(DatasetKind::Locations).await.unwrap();
        assert_eq!(table.len(), 2);
        let pier = Location::from_feature(table.feature(7).unwrap()).unwrap();
        assert_eq!(pier.name, "Pier A");
    }

    #[tokio::test]
    async fn test_read_only_leaves_edits_unanswered() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let remote =
            MockRemote::new(Arc::clone(&bus)).with_dataset(DatasetKind::Locations, locations());
        remote.set_read_only(true);

        let dock = Location::new(8, 45.0, -93.0, "Dock");
        remote
            .add_feature(DatasetKind::Locations, dock.to_feature(), 1)
            .await;
        remote.delete_feature(DatasetKind::Locations, 7, 1).await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(remote.edits().await.len(), 2);
        assert_eq!(remote.dataset(DatasetKind::Locations).await.unwrap().len(), 1);
    }
}
