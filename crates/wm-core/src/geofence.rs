//! Geofence monitor.
//!
//! Fences are registered per channel as a named set, one fence per source
//! geometry. Each position update is tested against every fence; a fence
//! whose inside/outside state flips produces a [`GeofenceEvent`], which is
//! both returned and published on the fence's channel.
//!
//! A point geometry triggers within the trigger distance (haversine,
//! meters). A polygon triggers when the position is inside the ring or
//! within the trigger distance of its boundary.
//!
//! Overlapping fences are evaluated independently: standing where two
//! fences overlap yields an `Entered` for each. Within one update all
//! `Exited` events are emitted before any `Entered` event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use wm_types::{Geometry, Location, Position, RecordId};

use crate::bus::{Channel, EventBus};
use crate::error::{Error, Result};
use crate::messages::{FenceEventKind, GeofenceEvent};

/// Trigger distance bounds accepted by the monitor, in meters.
pub const MIN_TRIGGER_DISTANCE: f64 = 1.0;
pub const MAX_TRIGGER_DISTANCE: f64 = 20.0;

/// A geometry to fence, tagged with the record it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct FenceSource {
    pub record_id: RecordId,
    pub geometry: Geometry,
}

impl FenceSource {
    pub fn new(record_id: RecordId, geometry: Geometry) -> Self {
        Self {
            record_id,
            geometry,
        }
    }
}

impl From<&Location> for FenceSource {
    fn from(location: &Location) -> Self {
        Self::new(location.id, Geometry::Point(location.point()))
    }
}

#[derive(Debug)]
struct Fence {
    source: FenceSource,
    inside: bool,
}

#[derive(Debug)]
struct FenceSet {
    name: String,
    trigger_distance: f64,
    fences: Vec<Fence>,
}

/// Registry of fence sets keyed by channel.
#[derive(Debug)]
pub struct GeofenceMonitor {
    bus: Arc<EventBus>,
    sets: Mutex<BTreeMap<Channel, FenceSet>>,
}

impl GeofenceMonitor {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            sets: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Channel, FenceSet>> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(trigger_distance: f64) -> Result<()> {
        if !(MIN_TRIGGER_DISTANCE..=MAX_TRIGGER_DISTANCE).contains(&trigger_distance) {
            return Err(Error::invalid_input(format!(
                "trigger distance {trigger_distance} outside {MIN_TRIGGER_DISTANCE}..={MAX_TRIGGER_DISTANCE} m"
            )));
        }
        Ok(())
    }

    /// Register a fence set on `channel`, one fence per source.
    ///
    /// Fails with [`Error::ChannelInUse`] if the channel already has one.
    pub fn add_fence(
        &self,
        sources: Vec<FenceSource>,
        name: impl Into<String>,
        channel: Channel,
        trigger_distance: f64,
    ) -> Result<()> {
        Self::validate(trigger_distance)?;
        let mut sets = self.lock();
        if sets.contains_key(&channel) {
            return Err(Error::ChannelInUse(channel));
        }
        let name = name.into();
        info!(
            "Registering {} fence(s) '{}' on channel {}",
            sources.len(),
            name,
            channel
        );
        sets.insert(
            channel,
            FenceSet {
                name,
                trigger_distance,
                fences: sources
                    .into_iter()
                    .map(|source| Fence {
                        source,
                        inside: false,
                    })
                    .collect(),
            },
        );
        Ok(())
    }

    /// Register or re-register the fence set on `channel`.
    ///
    /// Fences for record ids that were already fenced keep their
    /// inside/outside state, so a reload does not re-fire `Entered`.
    pub fn replace_fence(
        &self,
        sources: Vec<FenceSource>,
        name: impl Into<String>,
        channel: Channel,
        trigger_distance: f64,
    ) -> Result<()> {
        Self::validate(trigger_distance)?;
        let mut sets = self.lock();
        let previous = sets.remove(&channel);
        let was_inside = |id: RecordId| {
            previous.as_ref().is_some_and(|set| {
                set.fences
                    .iter()
                    .any(|f| f.source.record_id == id && f.inside)
            })
        };
        let fences = sources
            .into_iter()
            .map(|source| Fence {
                inside: was_inside(source.record_id),
                source,
            })
            .collect::<Vec<_>>();
        let name = name.into();
        debug!(
            "Replacing fences on channel {} with {} fence(s) '{}'",
            channel,
            fences.len(),
            name
        );
        sets.insert(
            channel,
            FenceSet {
                name,
                trigger_distance,
                fences,
            },
        );
        Ok(())
    }

    /// Remove the fence set on `channel`. Returns false if there was none.
    pub fn remove_fence(&self, channel: Channel) -> bool {
        let removed = self.lock().remove(&channel).is_some();
        if removed {
            info!("Released fences on channel {}", channel);
        }
        removed
    }

    /// Remove every fence set.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Channels with a registered fence set, ascending.
    pub fn active_channels(&self) -> Vec<Channel> {
        self.lock().keys().copied().collect()
    }

    /// Number of fences on `channel`.
    pub fn fence_count(&self, channel: Channel) -> usize {
        self.lock().get(&channel).map_or(0, |s| s.fences.len())
    }

    /// Record ids whose fence currently contains the last position.
    pub fn inside(&self, channel: Channel) -> Vec<RecordId> {
        self.lock().get(&channel).map_or_else(Vec::new, |s| {
            s.fences
                .iter()
                .filter(|f| f.inside)
                .map(|f| f.source.record_id)
                .collect()
        })
    }

    /// Test `position` against every fence and publish crossings.
    pub fn update_position(&self, position: Position) -> Vec<GeofenceEvent> {
        let mut exited = Vec::new();
        let mut entered = Vec::new();

        {
            let mut sets = self.lock();
            for (&channel, set) in sets.iter_mut() {
                for fence in &mut set.fences {
                    let distance = fence.source.geometry.distance_to(&position.point);
                    let inside = distance <= set.trigger_distance;
                    if inside == fence.inside {
                        continue;
                    }
                    fence.inside = inside;
                    let kind = if inside {
                        FenceEventKind::Entered
                    } else {
                        FenceEventKind::Exited
                    };
                    let event = GeofenceEvent {
                        channel,
                        fence_name: set.name.clone(),
                        record_id: fence.source.record_id,
                        kind,
                        position,
                    };
                    if inside {
                        entered.push(event);
                    } else {
                        exited.push(event);
                    }
                }
            }
        }

        exited.extend(entered);
        for event in &exited {
            debug!(
                "{:?} fence {} '{}' on channel {}",
                event.kind, event.record_id, event.fence_name, event.channel
            );
            self.bus.publish_on(event.clone(), event.channel);
        }
        exited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wm_types::Point;

    fn pier_a() -> FenceSource {
        FenceSource::new(7, Geometry::Point(Point::new(44.9, -93.2)))
    }

    fn monitor() -> GeofenceMonitor {
        GeofenceMonitor::new(Arc::new(EventBus::new()))
    }

    fn at(lat: f64, lon: f64) -> Position {
        Position::now(Point::new(lat, lon))
    }

    #[test]
    fn test_enter_and_exit_point_fence() {
        let monitor = monitor();
        monitor.add_fence(vec![pier_a()], "locations", 1, 10.0).unwrap();

        // ~111 m north: outside.
        assert!(monitor.update_position(at(44.901, -93.2)).is_empty());

        let events = monitor.update_position(at(44.90005, -93.2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FenceEventKind::Entered);
        assert_eq!(events[0].record_id, 7);
        assert_eq!(events[0].fence_name, "locations");

        // Staying inside does not re-fire.
        assert!(monitor.update_position(at(44.9, -93.2)).is_empty());
        assert_eq!(monitor.inside(1), vec![7]);

        let events = monitor.update_position(at(44.91, -93.2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FenceEventKind::Exited);
    }

    #[test]
    fn test_channel_in_use() {
        let monitor = monitor();
        monitor.add_fence(vec![pier_a()], "a", 1, 10.0).unwrap();
        assert!(matches!(
            monitor.add_fence(vec![pier_a()], "b", 1, 10.0),
            Err(Error::ChannelInUse(1))
        ));
        monitor.add_fence(vec![pier_a()], "b", 2, 10.0).unwrap();
        assert_eq!(monitor.active_channels(), vec![1, 2]);
    }

    #[test]
    fn test_trigger_distance_bounds() {
        let monitor = monitor();
        assert!(monitor.add_fence(vec![pier_a()], "a", 1, 0.5).is_err());
        assert!(monitor.add_fence(vec![pier_a()], "a", 1, 25.0).is_err());
        assert!(monitor.add_fence(vec![pier_a()], "a", 1, 20.0).is_ok());
    }

    #[test]
    fn test_overlapping_fences_emit_independently() {
        let monitor = monitor();
        let near = FenceSource::new(8, Geometry::Point(Point::new(44.90003, -93.2)));
        monitor
            .add_fence(vec![pier_a(), near], "locations", 1, 10.0)
            .unwrap();

        let events = monitor.update_position(at(44.900015, -93.2));
        let ids: Vec<_> = events.iter().map(|e| e.record_id).collect();
        assert_eq!(ids, vec![7, 8]);
        assert!(events.iter().all(|e| e.kind == FenceEventKind::Entered));
    }

    #[test]
    fn test_exits_are_emitted_before_entries() {
        let monitor = monitor();
        let far = FenceSource::new(9, Geometry::Point(Point::new(44.95, -93.2)));
        monitor
            .add_fence(vec![far, pier_a()], "locations", 1, 10.0)
            .unwrap();
        monitor.update_position(at(44.95, -93.2));

        let events = monitor.update_position(at(44.9, -93.2));
        let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.record_id)).collect();
        assert_eq!(
            kinds,
            vec![(FenceEventKind::Exited, 9), (FenceEventKind::Entered, 7)]
        );
    }

    #[test]
    fn test_polygon_fence() {
        let monitor = monitor();
        let ring = Geometry::Polygon(vec![
            Point::new(45.0, -93.0),
            Point::new(45.0, -92.99),
            Point::new(45.01, -92.99),
            Point::new(45.01, -93.0),
        ]);
        monitor
            .add_fence(vec![FenceSource::new(3, ring)], "bays", 2, 5.0)
            .unwrap();

        let events = monitor.update_position(at(45.005, -92.995));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FenceEventKind::Entered);
        assert_eq!(events[0].channel, 2);
    }

    #[test]
    fn test_replace_keeps_inside_state() {
        let monitor = monitor();
        monitor.add_fence(vec![pier_a()], "locations", 1, 10.0).unwrap();
        monitor.update_position(at(44.9, -93.2));

        let dock = FenceSource::new(8, Geometry::Point(Point::new(45.0, -93.0)));
        monitor
            .replace_fence(vec![pier_a(), dock], "locations", 1, 10.0)
            .unwrap();
        assert_eq!(monitor.fence_count(1), 2);
        assert!(monitor.update_position(at(44.9, -93.2)).is_empty());
    }

    #[test]
    fn test_events_are_published_on_channel() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let bus = Arc::new(EventBus::new());
        let monitor = GeofenceMonitor::new(Arc::clone(&bus));
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        bus.subscribe::<GeofenceEvent, _>(bus.owner(), Some(1), move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        monitor.add_fence(vec![pier_a()], "locations", 1, 10.0).unwrap();
        monitor.update_position(at(44.9, -93.2));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(monitor.remove_fence(1));
        assert!(!monitor.remove_fence(1));
        assert!(monitor.active_channels().is_empty());
    }
}
