//! # Connectivity
//!
//! Push-based online/offline signal and the edge detection that turns it
//! into sync triggers.
//!
//! ## Signal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Connectivity Signal                              │
//! │                                                                         │
//! │  ConnectivityProbe (agent)   platform callbacks   tests                │
//! │           │                         │               │                   │
//! │           └──────────── set_online(bool) ───────────┘                   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │                  ConnectivityMonitor (watch<bool>)                      │
//! │                               │                                         │
//! │          ┌────────────────────┼─────────────────────┐                   │
//! │          ▼                    ▼                     ▼                   │
//! │   SyncManager.is_online   SyncManager driver    other subscribers      │
//! │   (latest value)          EdgeDetector                                 │
//! │                               │                                         │
//! │                 false → true  │  CameOnline → one drain pass            │
//! │                 true  → true  │  nothing (repeated push)                │
//! │                 true  → false │  WentOffline                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::config::OfflineConfig;
use crate::error::{OfflineError, OfflineResult};

// =============================================================================
// Monitor
// =============================================================================

/// Owner of the connectivity signal.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        ConnectivityMonitor { tx: Arc::new(tx) }
    }

    /// Pushes the latest reachability. Identical values are pushed too.
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// =============================================================================
// Edge Detection
// =============================================================================

/// A change between two consecutive connectivity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEdge {
    CameOnline,
    WentOffline,
}

/// Stateful comparison of consecutive connectivity values.
///
/// The first value only seeds the detector.
#[derive(Debug, Default, Clone)]
pub struct EdgeDetector {
    last: Option<bool>,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector already holding `initial` as the previous value.
    pub fn seeded(initial: bool) -> Self {
        EdgeDetector {
            last: Some(initial),
        }
    }

    pub fn observe(&mut self, online: bool) -> Option<ConnectivityEdge> {
        match self.last.replace(online) {
            Some(false) if online => Some(ConnectivityEdge::CameOnline),
            Some(true) if !online => Some(ConnectivityEdge::WentOffline),
            _ => None,
        }
    }

    pub fn last(&self) -> Option<bool> {
        self.last
    }
}

// =============================================================================
// Reachability Probe
// =============================================================================

/// Periodically checks whether the API host answers and feeds a monitor.
///
/// Any HTTP response counts as reachable; only transport-level failures
/// (DNS, connect, timeout) count as offline.
pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: Url,
    interval: Duration,
    monitor: ConnectivityMonitor,
}

/// Handle to a running probe.
pub struct ProbeHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Stops the probe and waits for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

impl ConnectivityProbe {
    pub fn new(config: &OfflineConfig, monitor: ConnectivityMonitor) -> OfflineResult<Self> {
        let url = Url::parse(config.probe_url())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.connectivity.probe_timeout_secs))
            .build()
            .map_err(|e| OfflineError::InvalidConfig(e.to_string()))?;

        Ok(ConnectivityProbe {
            client,
            url,
            interval: Duration::from_secs(config.connectivity.probe_interval_secs.max(1)),
            monitor,
        })
    }

    /// Issues one probe request.
    pub async fn probe_once(&self) -> bool {
        match self.client.head(self.url.clone()).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    /// Spawns the probe loop. The first probe runs immediately.
    pub fn spawn(self) -> ProbeHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            info!(url = %self.url, interval = ?self.interval, "Connectivity probe starting");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let online = self.probe_once().await;
                        self.monitor.set_online(online);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Connectivity probe stopped");
                        break;
                    }
                }
            }
        });

        ProbeHandle { shutdown_tx, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_only_seeds() {
        let mut edges = EdgeDetector::new();
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.last(), Some(true));

        let mut edges = EdgeDetector::new();
        assert_eq!(edges.observe(false), None);
    }

    #[test]
    fn test_only_transitions_are_edges() {
        let mut edges = EdgeDetector::seeded(false);

        assert_eq!(edges.observe(false), None);
        assert_eq!(edges.observe(true), Some(ConnectivityEdge::CameOnline));
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(false), Some(ConnectivityEdge::WentOffline));
        assert_eq!(edges.observe(true), Some(ConnectivityEdge::CameOnline));
    }

    #[tokio::test]
    async fn test_monitor_pushes_repeated_values() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());
    }
}
