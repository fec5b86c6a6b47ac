//! Updates delivered to the consumer (typically a UI).
//!
//! The coordinator never calls into the consumer. It pushes
//! [`ConsumerEvent`]s into a bounded channel that the consumer drains on
//! its own context. Session-level events go out immediately; record-level
//! events produced before the session is running are held back and
//! flushed once it is.

use std::collections::VecDeque;

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::warn;

use wm_types::{DatasetKind, Location, Observation, RecordId};

use crate::machine::SyncState;
use crate::messages::Connectivity;

/// Default capacity of the consumer channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// An update for the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    StateChanged { from: SyncState, to: SyncState },
    /// Both datasets are loaded; the consumer should call
    /// [`SyncCoordinator::consumer_ready`](crate::SyncCoordinator::consumer_ready).
    ReadyRequested,
    DatasetProgress { kind: DatasetKind, percent: u8 },
    LocationEntered(Location),
    LocationExited(RecordId),
    ObservationCreated(Observation),
    LocationDeleted(RecordId),
    Connectivity(Connectivity),
    Error(String),
}

impl ConsumerEvent {
    /// Whether the event is held back until the session is running.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            ConsumerEvent::LocationEntered(_)
                | ConsumerEvent::LocationExited(_)
                | ConsumerEvent::ObservationCreated(_)
                | ConsumerEvent::LocationDeleted(_)
        )
    }
}

/// Sending half of the consumer channel, with pre-`Running` buffering.
#[derive(Debug)]
pub struct ConsumerQueue {
    tx: Sender<ConsumerEvent>,
    pending: VecDeque<ConsumerEvent>,
    open: bool,
    dropped: u64,
}

impl ConsumerQueue {
    /// Create a queue and the receiver the consumer drains.
    pub fn channel(capacity: usize) -> (Self, Receiver<ConsumerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            pending: VecDeque::new(),
            open: false,
            dropped: 0,
        };
        (queue, rx)
    }

    /// Queue an event. Deferred events are buffered until [`open`](Self::open).
    pub fn push(&mut self, event: ConsumerEvent) {
        if !self.open && event.is_deferred() {
            self.pending.push_back(event);
            return;
        }
        self.send(event);
    }

    /// Deliver everything buffered and stop buffering.
    pub fn open(&mut self) {
        self.open = true;
        while let Some(event) = self.pending.pop_front() {
            self.send(event);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Events waiting for [`open`](Self::open).
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Events dropped because the consumer fell behind or went away.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn send(&mut self, event: ConsumerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                warn!("Consumer queue full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
            }
        }
    }
}
