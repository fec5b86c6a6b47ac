//! Synchronization state machine.
//!
//! [`SyncMachine`] is a pure transition function: it takes a [`Trigger`],
//! updates its state and returns a [`Transition`] listing the [`Effect`]s
//! the runtime must carry out. It performs no I/O, so every ordering can be
//! exercised directly in tests.
//!
//! ```text
//!  WaitingForObservations <──ObservationsReady── WaitingForLocations
//!        │      ──LocationsReady──────────────────────>      │
//!        └───────────────(both datasets loaded)──────────────┘
//!                                 │
//!                                 v
//!                             HaveBoth ──ConsumerReady──> Running
//!
//!  any state ──AppClosing──> AppClosing (terminal)
//! ```
//!
//! Both "have" flags are tracked independently of the state, so the
//! datasets may arrive in either order. A dataset-ready trigger in a state
//! that already has it re-runs the entry action without changing state.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use wm_types::{DatasetKind, FeatureTable};

use crate::messages::Connectivity;

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SyncState {
    #[default]
    WaitingForObservations,
    WaitingForLocations,
    HaveBoth,
    Running,
    AppClosing,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        self == SyncState::AppClosing
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::WaitingForObservations => "waiting for observations",
            SyncState::WaitingForLocations => "waiting for locations",
            SyncState::HaveBoth => "have both datasets",
            SyncState::Running => "running",
            SyncState::AppClosing => "closing",
        };
        f.write_str(s)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone)]
pub enum Trigger {
    ObservationsReady(Arc<FeatureTable>),
    LocationsReady(Arc<FeatureTable>),
    ConsumerReady,
    ConnectivityChanged(Connectivity),
    /// Incremental observation update while running.
    ObservationReceived(Arc<FeatureTable>),
    AppClosing,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::ObservationsReady(_) => "ObservationsReady",
            Trigger::LocationsReady(_) => "LocationsReady",
            Trigger::ConsumerReady => "ConsumerReady",
            Trigger::ConnectivityChanged(_) => "ConnectivityChanged",
            Trigger::ObservationReceived(_) => "ObservationReceived",
            Trigger::AppClosing => "AppClosing",
        }
    }
}

/// Work the runtime performs after a transition, in order.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Make `table` the session's current handle for `dataset` and upsert it
    /// into the record store.
    Mirror {
        dataset: DatasetKind,
        table: Arc<FeatureTable>,
    },
    /// (Re-)register location fences.
    RegisterFences,
    /// Ask the consumer to signal readiness.
    RequestConsumerReady,
    StartConnectivityMonitor,
    /// Deliver buffered consumer updates and queued edit propagation.
    FlushQueued,
    /// Ask the remote adapter again for a dataset that never arrived.
    RequestDataset(DatasetKind),
    LogConnectivity(Connectivity),
    UnsubscribeAll,
    ReleaseFences,
    /// The trigger is not valid in `state`; logged and otherwise ignored.
    Unhandled {
        state: SyncState,
        trigger: &'static str,
    },
}

/// Result of feeding one trigger.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: SyncState,
    pub to: SyncState,
    pub effects: Vec<Effect>,
}

impl Transition {
    /// Whether the state changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn is_unhandled(&self) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e, Effect::Unhandled { .. }))
    }
}

/// The coordinator's transition function and flags.
#[derive(Debug, Clone, Default)]
pub struct SyncMachine {
    state: SyncState,
    have_observations: bool,
    have_locations: bool,
    /// Consumer signalled readiness before both datasets arrived.
    consumer_ready: bool,
}

impl SyncMachine {
    /// Start in `WaitingForObservations` with no entry action run.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn have_observations(&self) -> bool {
        self.have_observations
    }

    pub fn have_locations(&self) -> bool {
        self.have_locations
    }

    /// Datasets not loaded yet.
    pub fn missing(&self) -> Vec<DatasetKind> {
        let mut missing = Vec::new();
        if !self.have_observations {
            missing.push(DatasetKind::Observations);
        }
        if !self.have_locations {
            missing.push(DatasetKind::Locations);
        }
        missing
    }

    /// Feed one trigger.
    pub fn handle(&mut self, trigger: Trigger) -> Transition {
        let from = self.state;
        let mut effects = Vec::new();
        let name = trigger.name();

        use SyncState::*;
        match (from, trigger) {
            (AppClosing, _) => effects.push(Effect::Unhandled {
                state: from,
                trigger: name,
            }),

            (_, Trigger::AppClosing) => {
                self.state = AppClosing;
                effects.push(Effect::UnsubscribeAll);
                effects.push(Effect::ReleaseFences);
            }

            (WaitingForObservations | WaitingForLocations, Trigger::ObservationsReady(table)) => {
                self.state = WaitingForObservations;
                effects.push(Effect::Mirror {
                    dataset: DatasetKind::Observations,
                    table,
                });
                self.have_observations = true;
                self.check_both_ready(&mut effects);
            }

            (WaitingForObservations | WaitingForLocations, Trigger::LocationsReady(table)) => {
                self.state = WaitingForLocations;
                effects.push(Effect::Mirror {
                    dataset: DatasetKind::Locations,
                    table,
                });
                effects.push(Effect::RegisterFences);
                self.have_locations = true;
                self.check_both_ready(&mut effects);
            }

            (HaveBoth | Running, Trigger::ObservationsReady(table)) => {
                effects.push(Effect::Mirror {
                    dataset: DatasetKind::Observations,
                    table,
                });
            }

            (HaveBoth | Running, Trigger::LocationsReady(table)) => {
                effects.push(Effect::Mirror {
                    dataset: DatasetKind::Locations,
                    table,
                });
                effects.push(Effect::RegisterFences);
            }

            (HaveBoth, Trigger::ConsumerReady) => self.enter_running(&mut effects),

            (WaitingForObservations | WaitingForLocations, Trigger::ConsumerReady) => {
                debug!("Consumer ready before both datasets; remembering");
                self.consumer_ready = true;
            }

            (WaitingForObservations | WaitingForLocations, Trigger::ConnectivityChanged(c)) => {
                if c.is_available() {
                    effects.extend(self.missing().into_iter().map(Effect::RequestDataset));
                }
            }

            (HaveBoth, Trigger::ConnectivityChanged(c))
            | (Running, Trigger::ConnectivityChanged(c)) => {
                effects.push(Effect::LogConnectivity(c));
            }

            (Running, Trigger::ObservationReceived(table)) => {
                effects.push(Effect::Mirror {
                    dataset: DatasetKind::Observations,
                    table,
                });
            }

            (state, _) => effects.push(Effect::Unhandled {
                state,
                trigger: name,
            }),
        }

        let transition = Transition {
            from,
            to: self.state,
            effects,
        };
        if transition.is_unhandled() {
            error!("Unhandled trigger {} in state {:?}", name, from);
        } else if transition.changed() {
            debug!("Sync state {:?} -> {:?} on {}", from, self.state, name);
        }
        transition
    }

    fn check_both_ready(&mut self, effects: &mut Vec<Effect>) {
        if !(self.have_observations && self.have_locations) {
            return;
        }
        self.state = SyncState::HaveBoth;
        if self.consumer_ready {
            self.enter_running(effects);
        } else {
            effects.push(Effect::RequestConsumerReady);
        }
    }

    fn enter_running(&mut self, effects: &mut Vec<Effect>) {
        self.state = SyncState::Running;
        effects.push(Effect::StartConnectivityMonitor);
        effects.push(Effect::FlushQueued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> Arc<FeatureTable> {
        Arc::new(FeatureTable::new(name, Vec::new()))
    }

    fn obs() -> Trigger {
        Trigger::ObservationsReady(table("obs"))
    }

    fn loc() -> Trigger {
        Trigger::LocationsReady(table("loc"))
    }

    fn mirrors(t: &Transition) -> Vec<DatasetKind> {
        t.effects
            .iter()
            .filter_map(|e| match e {
                Effect::Mirror { dataset, .. } => Some(*dataset),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let m = SyncMachine::new();
        assert_eq!(m.state(), SyncState::WaitingForObservations);
        assert!(!m.have_observations());
        assert!(!m.have_locations());
        assert_eq!(m.missing().len(), 2);
    }

    #[test]
    fn test_observations_then_locations() {
        let mut m = SyncMachine::new();
        let t = m.handle(obs());
        assert_eq!(t.to, SyncState::WaitingForObservations);
        assert_eq!(mirrors(&t), vec![DatasetKind::Observations]);

        let t = m.handle(loc());
        assert_eq!(t.from, SyncState::WaitingForObservations);
        assert_eq!(t.to, SyncState::HaveBoth);
        assert!(matches!(t.effects.last(), Some(Effect::RequestConsumerReady)));

        let t = m.handle(Trigger::ConsumerReady);
        assert_eq!(t.to, SyncState::Running);
    }

    #[test]
    fn test_locations_then_observations() {
        let mut m = SyncMachine::new();
        let t = m.handle(loc());
        assert_eq!(t.to, SyncState::WaitingForLocations);
        assert!(t.effects.iter().any(|e| matches!(e, Effect::RegisterFences)));

        let t = m.handle(obs());
        assert_eq!(t.to, SyncState::HaveBoth);
        m.handle(Trigger::ConsumerReady);
        assert_eq!(m.state(), SyncState::Running);
    }

    #[test]
    fn test_consumer_ready_needs_both_datasets() {
        let mut m = SyncMachine::new();
        m.handle(loc());
        m.handle(loc());
        assert_eq!(m.state(), SyncState::WaitingForLocations);
        m.handle(Trigger::ConsumerReady);
        assert_eq!(m.state(), SyncState::WaitingForLocations);

        // Remembered readiness completes the startup once both arrive.
        let t = m.handle(obs());
        assert_eq!(t.to, SyncState::Running);
        assert!(t.effects.iter().any(|e| matches!(e, Effect::FlushQueued)));
    }

    #[test]
    fn test_reentrant_ready_remirrors_without_transition() {
        let mut m = SyncMachine::new();
        let first = m.handle(obs());
        let again = m.handle(obs());
        assert_eq!(again.from, first.to);
        assert!(!again.changed());
        assert_eq!(mirrors(&again), vec![DatasetKind::Observations]);

        m.handle(loc());
        m.handle(Trigger::ConsumerReady);
        let t = m.handle(loc());
        assert_eq!(t.from, SyncState::Running);
        assert_eq!(t.to, SyncState::Running);
        assert_eq!(mirrors(&t), vec![DatasetKind::Locations]);
        assert!(t.effects.iter().any(|e| matches!(e, Effect::RegisterFences)));
    }

    #[test]
    fn test_connectivity_in_running_is_log_only() {
        let mut m = SyncMachine::new();
        m.handle(obs());
        m.handle(loc());
        m.handle(Trigger::ConsumerReady);

        for c in [Connectivity::Unavailable, Connectivity::Available] {
            let t = m.handle(Trigger::ConnectivityChanged(c));
            assert!(!t.changed());
            assert!(matches!(t.effects.as_slice(), [Effect::LogConnectivity(x)] if *x == c));
        }
    }

    #[test]
    fn test_connectivity_while_waiting_requests_missing() {
        let mut m = SyncMachine::new();
        m.handle(obs());
        let t = m.handle(Trigger::ConnectivityChanged(Connectivity::Available));
        assert!(matches!(
            t.effects.as_slice(),
            [Effect::RequestDataset(DatasetKind::Locations)]
        ));
        let t = m.handle(Trigger::ConnectivityChanged(Connectivity::Unavailable));
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_unhandled_triggers() {
        let mut m = SyncMachine::new();
        let t = m.handle(Trigger::ObservationReceived(table("obs")));
        assert!(t.is_unhandled());
        assert_eq!(m.state(), SyncState::WaitingForObservations);

        m.handle(obs());
        m.handle(loc());
        m.handle(Trigger::ConsumerReady);
        assert!(m.handle(Trigger::ConsumerReady).is_unhandled());
        assert_eq!(m.state(), SyncState::Running);
    }

    #[test]
    fn test_app_closing_is_terminal() {
        let mut m = SyncMachine::new();
        let t = m.handle(Trigger::AppClosing);
        assert_eq!(t.to, SyncState::AppClosing);
        assert!(t.effects.iter().any(|e| matches!(e, Effect::UnsubscribeAll)));
        assert!(t.effects.iter().any(|e| matches!(e, Effect::ReleaseFences)));

        for trigger in [obs(), loc(), Trigger::ConsumerReady, Trigger::AppClosing] {
            let t = m.handle(trigger);
            assert!(t.is_unhandled());
            assert_eq!(t.to, SyncState::AppClosing);
        }
    }

    #[test]
    fn test_running_iff_both_and_consumer_ready() {
        // Every interleaving of the three signals ends in Running, and no
        // prefix missing one of them does.
        let orders: [[u8; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut m = SyncMachine::new();
            for (i, step) in order.iter().enumerate() {
                let trigger = match step {
                    0 => obs(),
                    1 => loc(),
                    _ => Trigger::ConsumerReady,
                };
                m.handle(trigger);
                let running = m.state() == SyncState::Running;
                assert_eq!(running, i == 2, "order {order:?} step {i}");
            }
        }
    }

    fn trigger(code: u8) -> Trigger {
        match code {
            0 => obs(),
            1 => loc(),
            2 => Trigger::ConsumerReady,
            3 => Trigger::ConnectivityChanged(Connectivity::Available),
            4 => Trigger::ConnectivityChanged(Connectivity::Unavailable),
            5 => Trigger::ObservationReceived(table("obs")),
            _ => Trigger::AppClosing,
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_running_needs_both_datasets_and_consumer(
            codes in proptest::collection::vec(0u8..7, 0..40)
        ) {
            let mut m = SyncMachine::new();
            let mut seen = [false; 3];
            for code in codes {
                let closed = m.state() == SyncState::AppClosing;
                let t = m.handle(trigger(code));
                if let Some(flag) = seen.get_mut(code as usize) {
                    *flag = true;
                }

                if closed {
                    proptest::prop_assert_eq!(t.to, SyncState::AppClosing);
                    proptest::prop_assert!(t.is_unhandled());
                }
                if t.to == SyncState::Running {
                    proptest::prop_assert!(seen.iter().all(|s| *s));
                }
                let flushes = t.effects.iter().any(|e| matches!(e, Effect::FlushQueued));
                proptest::prop_assert_eq!(flushes, t.changed() && t.to == SyncState::Running);
            }
        }
    }
}
