//! Sync coordinator runtime.
//!
//! [`SyncCoordinator::start`] wires a [`SyncMachine`] to the bus, the
//! record store, the remote adapter and the geofence monitor, then runs it
//! on a background task. Bus messages and caller commands are funnelled
//! through one inbox so the machine sees a single ordered stream of
//! triggers. Effects run on that task, and remote I/O is spawned from it.
//!
//! The returned [`SyncCoordinator`] is a cheap cloneable handle. Updates for
//! the consumer arrive on the [`ConsumerEvent`] receiver returned next to
//! it.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use wm_store::{CollectScope, Record, Table};
use wm_types::{
    CollectionStatus, DatasetKind, Feature, FeatureTable, Location, Observation, Position,
    RecordId, RecordStatus,
};

use crate::bus::{Channel, EventBus, OwnerId};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, NetworkProbe};
use crate::consumer::{ConsumerEvent, ConsumerQueue};
use crate::error::{Error, Result};
use crate::geofence::{FenceSource, GeofenceMonitor};
use crate::machine::{Effect, SyncMachine, SyncState, Trigger};
use crate::messages::{
    Connectivity, ConnectivityChanged, ConsumerReady, CurrentDataset, DatasetProgress,
    DatasetReady, DatasetRequest, DatasetUnavailable, EditOp, FeatureAcknowledged,
    FeatureRejected, FenceEventKind, GeofenceEvent, Propagation,
};
use crate::records::RecordStore;
use crate::remote::RemoteDataset;

/// Collaborators the coordinator is built from. All are required.
pub struct Services {
    pub bus: Arc<EventBus>,
    pub store: RecordStore,
    pub remote: Arc<dyn RemoteDataset>,
    pub geofence: Arc<GeofenceMonitor>,
    pub probe: Arc<dyn NetworkProbe>,
}

/// A local edit waiting to be handed to the remote adapter.
#[derive(Debug, Clone)]
enum Edit {
    Add(DatasetKind, Feature),
    Update(DatasetKind, Feature),
    Delete(DatasetKind, RecordId),
}

impl Edit {
    fn propagation(&self, channel: Channel) -> Propagation {
        let (dataset, op, id) = match self {
            Edit::Add(d, f) => (*d, EditOp::Add, f.object_id),
            Edit::Update(d, f) => (*d, EditOp::Update, f.object_id),
            Edit::Delete(d, id) => (*d, EditOp::Delete, *id),
        };
        Propagation {
            dataset,
            op,
            id,
            channel,
        }
    }
}

enum Command {
    UpdatePosition {
        position: Position,
        reply: oneshot::Sender<Vec<GeofenceEvent>>,
    },
    Submit {
        measurements: Vec<f64>,
        reply: oneshot::Sender<Result<Observation>>,
    },
    AddLocation {
        location: Location,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateLocation {
        location: Location,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteLocation {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },
    ActiveLocation {
        reply: oneshot::Sender<Option<Location>>,
    },
    Locations {
        reply: oneshot::Sender<Vec<Location>>,
    },
    Refresh {
        kind: DatasetKind,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Inbox {
    Trigger(Trigger),
    Ready(DatasetReady),
    Unavailable(DatasetUnavailable),
    Progress(DatasetProgress),
    Connectivity(Connectivity),
    Acknowledged(FeatureAcknowledged),
    Rejected(FeatureRejected),
    Geofence(GeofenceEvent),
    Command(Command),
}

type CurrentTables = Arc<Mutex<HashMap<DatasetKind, Arc<FeatureTable>>>>;

/// Handle to a running sync session.
#[derive(Clone)]
pub struct SyncCoordinator {
    inbox: mpsc::UnboundedSender<Inbox>,
    state: watch::Receiver<SyncState>,
    bus: Arc<EventBus>,
    channel: Channel,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("channel", &self.channel)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl SyncCoordinator {
    /// Validate `config`, subscribe to the bus and start the session task.
    ///
    /// Both datasets are requested immediately. Must be called inside a
    /// tokio runtime.
    pub fn start(
        config: &Config,
        services: Services,
    ) -> Result<(Self, mpsc::Receiver<ConsumerEvent>)> {
        config
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;

        let channel = config.session.channel;
        let (consumer, events) = ConsumerQueue::channel(config.session.consumer_queue);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SyncState::default());

        let Services {
            bus,
            store,
            remote,
            geofence,
            probe,
        } = services;

        let owner = bus.owner();
        let current = CurrentTables::default();
        subscribe(&bus, owner, channel, &inbox_tx, &current);

        let session = Session {
            channel,
            owner,
            config: config.clone(),
            bus: Arc::clone(&bus),
            store,
            remote,
            geofence,
            probe,
            machine: SyncMachine::new(),
            consumer,
            state_tx,
            current,
            locations: BTreeMap::new(),
            active: None,
            last_position: None,
            queued: VecDeque::new(),
            in_flight: HashSet::new(),
            monitor: None,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shutdown_replies: Vec::new(),
        };
        tokio::spawn(session.run(inbox_rx));

        Ok((
            Self {
                inbox: inbox_tx,
                state: state_rx,
                bus,
                channel,
            },
            events,
        ))
    }

    /// Bus channel of this session.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Current machine state.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Wait until the machine reaches `target`.
    ///
    /// Effects of the transition into `target` have completed when this
    /// returns.
    pub async fn wait_for_state(&self, target: SyncState) -> Result<()> {
        let mut state = self.state.clone();
        if state.wait_for(|s| *s == target).await.is_err() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Signal that the consumer is ready for session updates.
    pub fn consumer_ready(&self) {
        self.bus.publish_on(ConsumerReady, self.channel);
    }

    /// Feed a position fix through the geofences; returns the crossings.
    pub async fn update_position(&self, position: Position) -> Result<Vec<GeofenceEvent>> {
        self.call(|reply| Command::UpdatePosition { position, reply })
            .await
    }

    /// Record an observation at the active location.
    ///
    /// Fails with [`Error::NoActiveLocation`] outside every location fence.
    pub async fn submit_observation(&self, measurements: &[f64]) -> Result<Observation> {
        let measurements = measurements.to_vec();
        self.call(|reply| Command::Submit {
            measurements,
            reply,
        })
        .await?
    }

    /// Add a location locally and propagate it.
    pub async fn add_location(&self, location: Location) -> Result<()> {
        self.call(|reply| Command::AddLocation { location, reply })
            .await?
    }

    /// Replace a known location locally and propagate the change.
    pub async fn update_location(&self, location: Location) -> Result<()> {
        self.call(|reply| Command::UpdateLocation { location, reply })
            .await?
    }

    /// Delete a location locally and propagate the delete.
    ///
    /// An unknown id fails with [`Error::UnknownLocation`] and changes
    /// nothing.
    pub async fn delete_location(&self, id: RecordId) -> Result<()> {
        self.call(|reply| Command::DeleteLocation { id, reply })
            .await?
    }

    /// The location whose fence was entered last, if still inside.
    pub async fn active_location(&self) -> Result<Option<Location>> {
        self.call(|reply| Command::ActiveLocation { reply }).await
    }

    /// The session's location collection, by id.
    pub async fn locations(&self) -> Result<Vec<Location>> {
        self.call(|reply| Command::Locations { reply }).await
    }

    /// Download a dataset again, bypassing caches.
    pub fn refresh(&self, kind: DatasetKind) -> Result<()> {
        self.inbox
            .send(Inbox::Command(Command::Refresh { kind }))
            .map_err(|_| Error::Closed)
    }

    /// Close the session and wait for in-flight work to finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbox::Command(command(tx)))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Forward bus messages of type `M` into the inbox.
fn forward<M, F>(
    bus: &EventBus,
    owner: OwnerId,
    channel: Option<Channel>,
    inbox: &mpsc::UnboundedSender<Inbox>,
    wrap: F,
) where
    M: Any + Send + Sync,
    F: Fn(&M) -> Inbox + Send + Sync + 'static,
{
    let inbox = inbox.clone();
    bus.subscribe::<M, _>(owner, channel, move |message| {
        // The session has ended if the send fails.
        let _ = inbox.send(wrap(message));
    });
}

fn subscribe(
    bus: &EventBus,
    owner: OwnerId,
    channel: Channel,
    inbox: &mpsc::UnboundedSender<Inbox>,
    current: &CurrentTables,
) {
    let on = Some(channel);
    forward::<DatasetReady, _>(bus, owner, on, inbox, |m| Inbox::Ready(m.clone()));
    forward::<DatasetUnavailable, _>(bus, owner, on, inbox, |m| Inbox::Unavailable(m.clone()));
    forward::<DatasetProgress, _>(bus, owner, on, inbox, |m| Inbox::Progress(m.clone()));
    forward::<FeatureAcknowledged, _>(bus, owner, on, inbox, |m| {
        Inbox::Acknowledged(m.clone())
    });
    forward::<FeatureRejected, _>(bus, owner, on, inbox, |m| Inbox::Rejected(m.clone()));
    forward::<GeofenceEvent, _>(bus, owner, on, inbox, |m| Inbox::Geofence(m.clone()));
    forward::<ConsumerReady, _>(bus, owner, on, inbox, |_| {
        Inbox::Trigger(Trigger::ConsumerReady)
    });
    forward::<ConnectivityChanged, _>(bus, owner, None, inbox, |m| {
        Inbox::Connectivity(m.connectivity)
    });

    let current = Arc::clone(current);
    bus.respond::<CurrentDataset, Option<Arc<FeatureTable>>, _>(owner, on, move |query| {
        current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&query.kind)
            .cloned()
    });
}

struct Session {
    channel: Channel,
    owner: OwnerId,
    config: Config,
    bus: Arc<EventBus>,
    store: RecordStore,
    remote: Arc<dyn RemoteDataset>,
    geofence: Arc<GeofenceMonitor>,
    probe: Arc<dyn NetworkProbe>,
    machine: SyncMachine,
    consumer: ConsumerQueue,
    state_tx: watch::Sender<SyncState>,
    current: CurrentTables,
    locations: BTreeMap<RecordId, Location>,
    active: Option<RecordId>,
    last_position: Option<Position>,
    /// Edits held until the session is running.
    queued: VecDeque<Edit>,
    in_flight: HashSet<DatasetKind>,
    monitor: Option<ConnectivityMonitor>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    shutdown_replies: Vec<oneshot::Sender<()>>,
}

impl Session {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Inbox>) {
        info!("Sync session started on channel {}", self.channel);
        let force = self.config.remote.force_refresh;
        self.request_dataset(DatasetKind::Observations, force);
        self.request_dataset(DatasetKind::Locations, force);

        while let Some(message) = inbox.recv().await {
            self.dispatch(message).await;
            if self.machine.state().is_terminal() {
                break;
            }
        }

        self.cancel.cancel();
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        self.tracker.close();
        self.tracker.wait().await;
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        // Commands that raced the shutdown get Error::Closed.
        inbox.close();
        info!("Sync session on channel {} closed", self.channel);
    }

    async fn dispatch(&mut self, message: Inbox) {
        match message {
            Inbox::Trigger(trigger) => self.fire(trigger).await,
            Inbox::Ready(ready) => {
                self.in_flight.remove(&ready.kind);
                let trigger = match ready.kind {
                    DatasetKind::Observations if self.machine.state() == SyncState::Running => {
                        Trigger::ObservationReceived(ready.table)
                    }
                    DatasetKind::Observations => Trigger::ObservationsReady(ready.table),
                    DatasetKind::Locations => Trigger::LocationsReady(ready.table),
                };
                self.fire(trigger).await;
            }
            Inbox::Unavailable(unavailable) => {
                self.in_flight.remove(&unavailable.kind);
                warn!(
                    "{} dataset unavailable, staying in {}: {}",
                    unavailable.kind,
                    self.machine.state(),
                    unavailable.reason
                );
                self.consumer.push(ConsumerEvent::Error(format!(
                    "{} dataset unavailable: {}",
                    unavailable.kind, unavailable.reason
                )));
            }
            Inbox::Progress(progress) => self.consumer.push(ConsumerEvent::DatasetProgress {
                kind: progress.kind,
                percent: progress.percent,
            }),
            Inbox::Connectivity(connectivity) => {
                self.consumer.push(ConsumerEvent::Connectivity(connectivity));
                self.fire(Trigger::ConnectivityChanged(connectivity)).await;
            }
            Inbox::Acknowledged(ack) => self.on_acknowledged(ack).await,
            Inbox::Rejected(rejected) => {
                warn!(
                    "Remote rejected {} of {} {}: {}",
                    rejected.op, rejected.dataset, rejected.id, rejected.reason
                );
                self.consumer.push(ConsumerEvent::Error(format!(
                    "{} of {} {} rejected: {}",
                    rejected.op, rejected.dataset, rejected.id, rejected.reason
                )));
            }
            Inbox::Geofence(event) => self.on_geofence(event),
            Inbox::Command(command) => self.command(command).await,
        }
    }

    async fn fire(&mut self, trigger: Trigger) {
        let transition = self.machine.handle(trigger);
        let changed = transition.changed();
        if changed {
            info!("Sync state {} -> {}", transition.from, transition.to);
            self.consumer.push(ConsumerEvent::StateChanged {
                from: transition.from,
                to: transition.to,
            });
        }
        for effect in transition.effects {
            self.apply(effect).await;
        }
        if changed {
            self.state_tx.send_replace(transition.to);
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Mirror { dataset, table } => self.mirror(dataset, table).await,
            Effect::RegisterFences => self.register_fences(),
            Effect::RequestConsumerReady => self.consumer.push(ConsumerEvent::ReadyRequested),
            Effect::StartConnectivityMonitor => {
                if self.monitor.is_none() {
                    let probe_config = &self.config.connectivity;
                    self.monitor = Some(ConnectivityMonitor::spawn(
                        Arc::clone(&self.bus),
                        Arc::clone(&self.probe),
                        probe_config.interval(),
                        self.cancel.child_token(),
                    ));
                }
            }
            Effect::FlushQueued => {
                self.consumer.open();
                let queued = std::mem::take(&mut self.queued);
                if !queued.is_empty() {
                    info!("Propagating {} queued edit(s)", queued.len());
                }
                for edit in queued {
                    self.send_edit(edit);
                }
            }
            Effect::RequestDataset(kind) => self.request_dataset(kind, false),
            Effect::LogConnectivity(connectivity) => {
                info!("Connectivity {} while {}", connectivity, self.machine.state());
            }
            Effect::UnsubscribeAll => {
                let removed = self.bus.unsubscribe_all(self.owner);
                debug!("Removed {} subscription(s)", removed);
            }
            Effect::ReleaseFences => {
                self.geofence.remove_fence(self.channel);
                self.active = None;
                self.cancel.cancel();
            }
            Effect::Unhandled { .. } => {}
        }
    }

    async fn mirror(&mut self, dataset: DatasetKind, table: Arc<FeatureTable>) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dataset, Arc::clone(&table));

        match self.store.mirror(Table::from(dataset), table).await.into_value() {
            Ok(summary) => info!(
                "Mirrored {} {} row(s) ({} skipped, {} pending kept)",
                summary.upserted, dataset, summary.skipped, summary.kept
            ),
            Err(e) => {
                error!("Mirroring {} failed: {}", dataset, e);
                self.consumer
                    .push(ConsumerEvent::Error(format!("could not store {dataset}: {e}")));
                return;
            }
        }

        if dataset == DatasetKind::Locations {
            self.reload_locations().await;
        }
    }

    async fn reload_locations(&mut self) {
        match self.store.locations().await.into_value() {
            Ok(locations) => {
                self.locations = locations.into_iter().map(|l| (l.id, l)).collect();
                if let Some(id) = self.active
                    && !self.locations.contains_key(&id)
                {
                    self.active = None;
                }
            }
            Err(e) => error!("Reloading locations failed: {}", e),
        }
    }

    fn register_fences(&mut self) {
        let sources = self.locations.values().map(FenceSource::from).collect();
        let fences = &self.config.geofence;
        if let Err(e) = self.geofence.replace_fence(
            sources,
            fences.fence_name.as_str(),
            self.channel,
            fences.trigger_distance,
        ) {
            error!("Registering location fences failed: {}", e);
        }
    }

    fn request_dataset(&mut self, kind: DatasetKind, force_refresh: bool) {
        if !self.in_flight.insert(kind) {
            debug!("{} request already in flight", kind);
            return;
        }
        let request = DatasetRequest {
            name: self.config.remote.name(kind).to_string(),
            kind,
            channel: self.channel,
            url: self.config.remote.url(kind).to_string(),
            force_refresh,
        };
        debug!("Requesting {} from {}", request.name, request.url);
        let remote = Arc::clone(&self.remote);
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            remote.request_dataset(request, cancel).await;
        });
    }

    /// Hand an edit to the remote adapter, or hold it until running.
    fn propagate(&mut self, edit: Edit) {
        if self.machine.state() == SyncState::Running {
            self.send_edit(edit);
        } else {
            debug!("Queueing {:?} until running", edit);
            self.queued.push_back(edit);
        }
    }

    fn send_edit(&self, edit: Edit) {
        self.bus
            .publish_on(edit.propagation(self.channel), self.channel);
        let remote = Arc::clone(&self.remote);
        let channel = self.channel;
        self.tracker.spawn(async move {
            match edit {
                Edit::Add(dataset, feature) => remote.add_feature(dataset, feature, channel).await,
                Edit::Update(dataset, feature) => {
                    remote.update_feature(dataset, feature, channel).await
                }
                Edit::Delete(dataset, id) => remote.delete_feature(dataset, id, channel).await,
            }
        });
    }

    async fn on_acknowledged(&mut self, ack: FeatureAcknowledged) {
        if ack.op == EditOp::Delete {
            return;
        }
        let table = Table::from(ack.dataset);
        let committed = self
            .store
            .commit_as(table, ack.id, ack.assigned_id)
            .await
            .into_value();
        if let Err(e) = committed {
            warn!("Committing {} {} failed: {}", table, ack.id, e);
            return;
        }
        debug!("{} {} committed as {}", table, ack.id, ack.assigned_id);

        if ack.dataset != DatasetKind::Locations {
            return;
        }
        if ack.assigned_id == ack.id {
            if let Some(location) = self.locations.get_mut(&ack.id) {
                location.status = RecordStatus::Committed;
            }
        } else {
            if self.active == Some(ack.id) {
                self.active = Some(ack.assigned_id);
            }
            self.reload_locations().await;
            self.register_fences();
        }
    }

    async fn command(&mut self, command: Command) {
        match command {
            Command::UpdatePosition { position, reply } => {
                self.last_position = Some(position);
                // Crossings are published before the reply, so they reach
                // the inbox ahead of any command sent after it.
                let events = self.geofence.update_position(position);
                let _ = reply.send(events);
            }
            Command::Submit {
                measurements,
                reply,
            } => {
                let result = self.submit(&measurements).await;
                let _ = reply.send(result);
            }
            Command::AddLocation { location, reply } => {
                let result = self.add_location(location).await;
                let _ = reply.send(result);
            }
            Command::UpdateLocation { location, reply } => {
                let result = self.update_location(location).await;
                let _ = reply.send(result);
            }
            Command::DeleteLocation { id, reply } => {
                let result = self.delete_location(id).await;
                let _ = reply.send(result);
            }
            Command::ActiveLocation { reply } => {
                let active = self.active.and_then(|id| self.locations.get(&id)).cloned();
                let _ = reply.send(active);
            }
            Command::Locations { reply } => {
                let _ = reply.send(self.locations.values().cloned().collect());
            }
            Command::Refresh { kind } => self.request_dataset(kind, true),
            Command::Shutdown { reply } => {
                self.shutdown_replies.push(reply);
                self.fire(Trigger::AppClosing).await;
            }
        }
    }

    /// Apply a fence crossing on this session's channel.
    ///
    /// Crossings arrive from the bus whichever session fed the fix, so
    /// sessions sharing a monitor each see their own edges.
    fn on_geofence(&mut self, event: GeofenceEvent) {
        self.last_position = Some(event.position);
        match event.kind {
            FenceEventKind::Entered => match self.locations.get(&event.record_id) {
                Some(location) => {
                    info!("Entered location {} '{}'", location.id, location.name);
                    self.active = Some(location.id);
                    self.consumer
                        .push(ConsumerEvent::LocationEntered(location.clone()));
                }
                None => warn!("Fence event for unknown location {}", event.record_id),
            },
            FenceEventKind::Exited => {
                if self.active == Some(event.record_id) {
                    self.active = None;
                }
                self.consumer
                    .push(ConsumerEvent::LocationExited(event.record_id));
            }
        }
    }

    async fn submit(&mut self, measurements: &[f64]) -> Result<Observation> {
        let location_id = self.active.ok_or(Error::NoActiveLocation)?;
        let location = self
            .locations
            .get(&location_id)
            .ok_or(Error::UnknownLocation(location_id))?;
        let at = self
            .last_position
            .map(|p| p.point)
            .unwrap_or_else(|| location.point());

        let mut observation =
            Observation::new(location_id, measurements, at, OffsetDateTime::now_utc())
                .map_err(|e| Error::invalid_input(e.to_string()))?;
        observation.id = self
            .store
            .insert(Record::Observation(observation.clone()))
            .await
            .into_value()?;

        self.store
            .set_collected_state(
                Table::Locations,
                location_id,
                CollectionStatus::Collected,
                CollectScope::Single,
            )
            .await
            .into_value()?;
        if let Some(location) = self.locations.get_mut(&location_id) {
            location.collected = CollectionStatus::Collected;
        }

        info!(
            "Observation {} at location {}: secchi {}",
            observation.id, location_id, observation.secchi
        );
        self.consumer
            .push(ConsumerEvent::ObservationCreated(observation.clone()));
        self.propagate(Edit::Add(DatasetKind::Observations, observation.to_feature()));
        Ok(observation)
    }

    async fn add_location(&mut self, location: Location) -> Result<()> {
        if self.locations.contains_key(&location.id) {
            return Err(Error::invalid_input(format!(
                "location {} already exists",
                location.id
            )));
        }
        let mut location = location;
        location.status = RecordStatus::WorkingSet;
        self.store
            .insert(Record::Location(location.clone()))
            .await
            .into_value()?;

        info!("Added location {} '{}'", location.id, location.name);
        let feature = location.to_feature();
        self.locations.insert(location.id, location);
        self.register_fences();
        self.propagate(Edit::Add(DatasetKind::Locations, feature));
        Ok(())
    }

    async fn update_location(&mut self, location: Location) -> Result<()> {
        if !self.locations.contains_key(&location.id) {
            error!("Cannot update unknown location {}", location.id);
            return Err(Error::UnknownLocation(location.id));
        }
        let mut location = location;
        location.status = RecordStatus::WorkingSet;
        self.store
            .update(Record::Location(location.clone()))
            .await
            .into_value()?;

        let feature = location.to_feature();
        self.locations.insert(location.id, location);
        self.register_fences();
        self.propagate(Edit::Update(DatasetKind::Locations, feature));
        Ok(())
    }

    async fn delete_location(&mut self, id: RecordId) -> Result<()> {
        if !self.locations.contains_key(&id) {
            error!("Cannot delete unknown location {}", id);
            return Err(Error::UnknownLocation(id));
        }
        self.store
            .delete(Table::Locations, id)
            .await
            .into_value()?;

        self.locations.remove(&id);
        if self.active == Some(id) {
            self.active = None;
        }
        info!("Deleted location {}", id);
        self.register_fences();
        self.consumer.push(ConsumerEvent::LocationDeleted(id));
        self.propagate(Edit::Delete(DatasetKind::Locations, id));
        Ok(())
    }
}
