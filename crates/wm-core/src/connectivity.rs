//! Network reachability monitoring.
//!
//! A [`ConnectivityMonitor`] polls a [`NetworkProbe`] on an interval and
//! publishes [`ConnectivityChanged`] (unchanneled) whenever the result
//! differs from the previous one. The first probe always publishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::messages::{Connectivity, ConnectivityChanged};

/// Source of reachability information.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn check(&self) -> Connectivity;
}

/// Considers the network available when a TCP connection to `addr`
/// succeeds within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn check(&self) -> Connectivity {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => Connectivity::Available,
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", self.addr, e);
                Connectivity::Unavailable
            }
            Err(_) => {
                debug!("Probe {} timed out after {:?}", self.addr, self.timeout);
                Connectivity::Unavailable
            }
        }
    }
}

/// Probe with a settable answer, for tests and offline runs.
#[derive(Debug)]
pub struct StaticProbe {
    state: AtomicU8,
    checks: AtomicU32,
}

impl StaticProbe {
    pub fn new(connectivity: Connectivity) -> Self {
        Self {
            state: AtomicU8::new(encode(connectivity)),
            checks: AtomicU32::new(0),
        }
    }

    pub fn set(&self, connectivity: Connectivity) {
        self.state.store(encode(connectivity), Ordering::Relaxed);
    }

    /// Number of times the probe was checked.
    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::Relaxed)
    }
}

fn encode(connectivity: Connectivity) -> u8 {
    match connectivity {
        Connectivity::Available => 1,
        Connectivity::Unavailable => 0,
    }
}

#[async_trait]
impl NetworkProbe for StaticProbe {
    async fn check(&self) -> Connectivity {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if self.state.load(Ordering::Relaxed) == 1 {
            Connectivity::Available
        } else {
            Connectivity::Unavailable
        }
    }
}

/// Background task publishing reachability transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Start polling `probe` every `interval`.
    ///
    /// The task stops when `cancel` (or [`stop`](Self::stop)) fires.
    pub fn spawn(
        bus: Arc<EventBus>,
        probe: Arc<dyn NetworkProbe>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run(bus, probe, interval, token).await;
        });
        Self { cancel, handle }
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Connectivity monitor task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    bus: Arc<EventBus>,
    probe: Arc<dyn NetworkProbe>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("Starting connectivity monitor (interval: {:?})", interval);
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Option<Connectivity> = None;
    let mut consecutive_unavailable = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        let connectivity = tokio::select! {
            _ = cancel.cancelled() => break,
            c = probe.check() => c,
        };

        if connectivity.is_available() {
            consecutive_unavailable = 0;
        } else {
            consecutive_unavailable += 1;
            if consecutive_unavailable == 4 {
                error!(
                    "Network unavailable for {} consecutive checks, will keep probing",
                    consecutive_unavailable
                );
            }
        }

        if last != Some(connectivity) {
            last = Some(connectivity);
            debug!("Connectivity is now {}", connectivity);
            bus.publish(ConnectivityChanged { connectivity });
        }
    }
    debug!("Connectivity monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture(bus: &EventBus) -> Arc<Mutex<Vec<Connectivity>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        bus.subscribe::<ConnectivityChanged, _>(bus.owner(), None, move |c| {
            l.lock().unwrap().push(c.connectivity);
        });
        log
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_transitions_only() {
        let bus = Arc::new(EventBus::new());
        let log = capture(&bus);
        let probe = Arc::new(StaticProbe::new(Connectivity::Available));

        let monitor = ConnectivityMonitor::spawn(
            Arc::clone(&bus),
            probe.clone(),
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        probe.set(Connectivity::Unavailable);
        tokio::time::sleep(Duration::from_secs(2)).await;
        probe.set(Connectivity::Available);
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop().await;

        assert!(probe.checks() >= 5);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Connectivity::Available,
                Connectivity::Unavailable,
                Connectivity::Available
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_cancel() {
        let bus = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();
        let monitor = ConnectivityMonitor::spawn(
            bus,
            Arc::new(StaticProbe::new(Connectivity::Unavailable)),
            Duration::from_secs(1),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.is_finished());
    }

    #[tokio::test]
    async fn test_tcp_probe_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = TcpProbe::new(addr.to_string(), Duration::from_millis(200));
        assert_eq!(probe.check().await, Connectivity::Unavailable);
    }

    #[tokio::test]
    async fn test_tcp_probe_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert_eq!(probe.check().await, Connectivity::Available);
    }
}
