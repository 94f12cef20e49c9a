//! # Sync Manager
//!
//! Drives the operation queue to empty against the network with bounded
//! concurrency, exponential backoff and connectivity awareness.
//!
//! ## Drain Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     sync_pending_operations()                           │
//! │                                                                         │
//! │  offline? ──► Err(Offline)       flag taken? ──► Err(SyncInProgress)   │
//! │                                                                         │
//! │  take processing flag (RAII guard)                                     │
//! │  loop:                                                                 │
//! │    batch = next_batch_excluding(attempted)   empty → stop              │
//! │    ┌──────────┐ ┌──────────┐ ┌──────────┐                              │
//! │    │  op 1    │ │  op 2    │ │  op 3    │   join_all, outcomes        │
//! │    │ pending  │ │ pending  │ │ pending  │   isolated per operation    │
//! │    │    ▼     │ │    ▼     │ │    ▼     │                              │
//! │    │processing│ │processing│ │processing│                              │
//! │    │    ▼     │ │    ▼     │ │    ▼     │                              │
//! │    │completed │ │ failed   │ │ pending  │ ◄── retry_count + 1,        │
//! │    └──────────┘ └──────────┘ └──────────┘     retry scheduled          │
//! │    nothing left to pull or went offline → stop                         │
//! │    sleep(inter_batch_delay)                                            │
//! │                                                                         │
//! │  drop guard (flag cleared), emit BatchSyncCompleted (+ QueueEmpty)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Driver Task
//! One background task owns the connectivity subscription, the edge detector
//! and the delay queue of scheduled retries. Because a single task reacts to
//! every offline→online edge, each edge produces exactly one drain attempt.
//!
//! ```text
//!   watch<bool> ──► EdgeDetector ── CameOnline ──┐
//!                                                ├──► drain (if online and idle)
//!   retry_tx ──► BinaryHeap<deadline> ── due ────┘
//! ```

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use ereceipt_core::{
    BatchSyncResult, OperationStatus, OperationUpdate, QueueStats, QueuedOperation, SyncResult,
};

use crate::config::SyncSettings;
use crate::connectivity::{ConnectivityEdge, EdgeDetector};
use crate::error::{OfflineError, OfflineResult};
use crate::events::{EventBus, OfflineEvent};
use crate::queue::OperationQueue;
use crate::retry::RetryPolicy;
use crate::transport::{RequestConfig, Transport};

// =============================================================================
// Status
// =============================================================================

/// Snapshot returned by [`SyncManager::get_sync_status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_processing: bool,
    pub queue_stats: QueueStats,
}

/// A deferred retry of one operation.
#[derive(Debug)]
struct ScheduledRetry {
    id: String,
    at: Instant,
}

// =============================================================================
// Sync Manager
// =============================================================================

/// Cloneable handle on the sync engine.
///
/// Must be created inside a tokio runtime: construction spawns the driver
/// task. The driver stops on [`SyncManager::destroy`] or when the last
/// handle is dropped.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<SyncInner>,
    driver: Arc<DriverControl>,
}

struct SyncInner {
    queue: Arc<OperationQueue>,
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
    inter_batch_delay: Duration,
    connectivity: watch::Receiver<bool>,
    events: EventBus,
    retry_tx: mpsc::UnboundedSender<ScheduledRetry>,
    destroyed: AtomicBool,
}

struct DriverControl {
    shutdown_tx: mpsc::Sender<()>,
}

impl Drop for DriverControl {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("is_online", &self.is_online())
            .field("is_processing", &self.inner.queue.is_currently_processing())
            .field("retry_policy", &self.inner.retry_policy)
            .finish_non_exhaustive()
    }
}

impl SyncManager {
    /// Creates the manager and spawns its driver task.
    ///
    /// `connectivity` is the push-based reachability signal. Its current
    /// value seeds the edge detector, so only later changes can trigger a
    /// drain.
    pub fn new(
        queue: Arc<OperationQueue>,
        transport: Arc<dyn Transport>,
        settings: &SyncSettings,
        connectivity: watch::Receiver<bool>,
        events: EventBus,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let mut driver_rx = connectivity.clone();
        let edges = EdgeDetector::seeded(*driver_rx.borrow_and_update());

        let inner = Arc::new(SyncInner {
            queue,
            transport,
            retry_policy: RetryPolicy::from_settings(settings),
            inter_batch_delay: settings.inter_batch_delay(),
            connectivity,
            events,
            retry_tx,
            destroyed: AtomicBool::new(false),
        });

        info!(
            online = edges.last().unwrap_or(false),
            inter_batch_delay_ms = settings.inter_batch_delay_ms,
            "Sync manager started"
        );

        tokio::spawn(drive(
            inner.clone(),
            driver_rx,
            edges,
            retry_rx,
            shutdown_rx,
        ));

        SyncManager {
            inner,
            driver: Arc::new(DriverControl { shutdown_tx }),
        }
    }

    /// Runs one full drain pass.
    ///
    /// Fails with [`OfflineError::Offline`] or [`OfflineError::SyncInProgress`]
    /// without touching the queue. Per-operation failures never surface
    /// here; they are recorded in the returned result.
    pub async fn sync_pending_operations(&self) -> OfflineResult<BatchSyncResult> {
        self.inner.sync_pending_operations().await
    }

    /// Drains if there is anything to drain.
    ///
    /// `Ok(None)` while offline, an empty result when nothing is pending.
    pub async fn trigger_sync(&self) -> OfflineResult<Option<BatchSyncResult>> {
        if !self.is_online() {
            debug!("Sync trigger ignored while offline");
            return Ok(None);
        }
        if self.inner.queue.get_stats().await.pending == 0 {
            return Ok(Some(BatchSyncResult::empty()));
        }
        self.inner.sync_pending_operations().await.map(Some)
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.is_online(),
            is_processing: self.inner.queue.is_currently_processing(),
            queue_stats: self.inner.queue.get_stats().await,
        }
    }

    /// Latest pushed connectivity value.
    pub fn is_online(&self) -> bool {
        self.inner.is_online()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    /// Stops the driver task. Requests already in flight run to completion.
    ///
    /// Safe to call more than once.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.driver.shutdown_tx.try_send(());
        info!("Sync manager destroyed");
    }
}

// =============================================================================
// Drain Logic
// =============================================================================

impl SyncInner {
    fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    async fn sync_pending_operations(&self) -> OfflineResult<BatchSyncResult> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(OfflineError::ShuttingDown);
        }
        if !self.is_online() {
            return Err(OfflineError::Offline);
        }
        let Some(guard) = self.queue.try_begin_processing() else {
            return Err(OfflineError::SyncInProgress);
        };

        info!("Sync pass starting");
        self.events.emit(OfflineEvent::SyncStarted);

        let mut attempted: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        let mut batches = 0usize;

        loop {
            let batch = self.queue.next_batch_excluding(&attempted).await;
            if batch.is_empty() {
                break;
            }
            batches += 1;
            attempted.extend(batch.iter().map(|op| op.id.clone()));
            debug!(batch = batches, batch_size = batch.len(), "Replaying batch");

            let outcomes = join_all(batch.into_iter().map(|op| self.sync_operation(op))).await;
            results.extend(outcomes.into_iter().flatten());

            if !self.is_online() {
                warn!(batches, "Connectivity lost, ending sync pass early");
                break;
            }
            if !self.queue.has_pending_excluding(&attempted).await {
                break;
            }
            tokio::time::sleep(self.inter_batch_delay).await;
        }

        drop(guard);

        let result = BatchSyncResult::from_results(results);
        info!(
            batches,
            total = result.total_operations,
            succeeded = result.success_count,
            failed = result.failure_count,
            "Sync pass finished"
        );
        self.events.emit(OfflineEvent::BatchSyncCompleted {
            result: result.clone(),
        });

        let stats = self.queue.get_stats().await;
        if stats.pending == 0 && stats.processing == 0 {
            self.events.emit(OfflineEvent::QueueEmpty);
        }

        Ok(result)
    }

    /// Replays one operation and records its outcome.
    ///
    /// `None` when the operation disappeared before it could be marked
    /// processing.
    async fn sync_operation(&self, op: QueuedOperation) -> Option<SyncResult> {
        let id = op.id.clone();

        match self
            .queue
            .update_operation(&id, OperationUpdate::status(OperationStatus::Processing))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(operation_id = %id, "Operation removed before replay");
                return None;
            }
            Err(e) => {
                warn!(operation_id = %id, error = %e, "Could not mark operation processing");
                return None;
            }
        }

        let config = RequestConfig::with_headers(op.headers.clone());
        let outcome = self
            .transport
            .execute(op.method, &op.endpoint, op.data.as_ref(), &config)
            .await;

        match outcome {
            Ok(response) => {
                self.record(
                    &id,
                    OperationUpdate::status(OperationStatus::Completed).clear_error(),
                )
                .await;
                debug!(operation_id = %id, status = response.status, "Operation completed");

                let result = SyncResult::succeeded(&id, response.data);
                self.events.emit(OfflineEvent::OperationCompleted {
                    result: result.clone(),
                });
                Some(result)
            }
            Err(e) if e.is_retryable() && op.has_retry_budget() => {
                let retry_count = op.retry_count + 1;
                self.record(
                    &id,
                    OperationUpdate::status(OperationStatus::Pending)
                        .with_retry_count(retry_count)
                        .with_error(e.to_string()),
                )
                .await;

                let delay = self.retry_policy.delay_for(op.retry_count);
                let delay_ms = delay.as_millis() as u64;
                let _ = self.retry_tx.send(ScheduledRetry {
                    id: id.clone(),
                    at: Instant::now() + delay,
                });
                warn!(
                    operation_id = %id,
                    retry_count,
                    delay_ms,
                    error = %e,
                    "Replay failed, retry scheduled"
                );
                self.events.emit(OfflineEvent::RetryScheduled {
                    id: id.clone(),
                    retry_count,
                    delay_ms,
                });

                Some(SyncResult::failed(&id, e.to_string(), e.status_code(), true))
            }
            Err(e) => {
                self.record(
                    &id,
                    OperationUpdate::status(OperationStatus::Failed).with_error(e.to_string()),
                )
                .await;
                error!(
                    operation_id = %id,
                    retry_count = op.retry_count,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Operation failed"
                );

                let result = SyncResult::failed(&id, e.to_string(), e.status_code(), false);
                self.events.emit(OfflineEvent::OperationFailed {
                    result: result.clone(),
                });
                Some(result)
            }
        }
    }

    async fn record(&self, id: &str, update: OperationUpdate) {
        match self.queue.update_operation(id, update).await {
            Ok(true) => {}
            Ok(false) => debug!(operation_id = %id, "Operation removed during replay"),
            Err(e) => warn!(operation_id = %id, error = %e, "Could not record replay outcome"),
        }
    }
}

// =============================================================================
// Driver Task
// =============================================================================

async fn drive(
    inner: Arc<SyncInner>,
    mut connectivity: watch::Receiver<bool>,
    mut edges: EdgeDetector,
    mut retry_rx: mpsc::UnboundedReceiver<ScheduledRetry>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut retries: BinaryHeap<Reverse<(Instant, u64, String)>> = BinaryHeap::new();
    let mut seq = 0u64;
    let mut connectivity_open = true;

    loop {
        let next_deadline = retries.peek().map(|Reverse((at, _, _))| *at);

        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(pending_retries = retries.len(), "Sync driver stopping");
                break;
            }
            changed = connectivity.changed(), if connectivity_open => {
                if changed.is_err() {
                    debug!("Connectivity signal closed");
                    connectivity_open = false;
                    continue;
                }
                let online = *connectivity.borrow_and_update();
                match edges.observe(online) {
                    Some(ConnectivityEdge::CameOnline) => {
                        info!("Back online");
                        inner.events.emit(OfflineEvent::ConnectivityChanged { online: true });
                        run_triggered_drain(&inner, "reconnect").await;
                    }
                    Some(ConnectivityEdge::WentOffline) => {
                        info!("Gone offline");
                        inner.events.emit(OfflineEvent::ConnectivityChanged { online: false });
                    }
                    None => {}
                }
            }
            Some(retry) = retry_rx.recv() => {
                seq += 1;
                retries.push(Reverse((retry.at, seq, retry.id)));
            }
            _ = sleep_until_next(next_deadline) => {
                let now = Instant::now();
                let mut due = Vec::new();
                while let Some(Reverse((at, _, _))) = retries.peek() {
                    if *at > now {
                        break;
                    }
                    if let Some(Reverse((_, _, id))) = retries.pop() {
                        due.push(id);
                    }
                }
                debug!(operations = ?due, "Scheduled retries due");
                run_triggered_drain(&inner, "retry").await;
            }
        }
    }
}

async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Drain started by the driver rather than a caller.
async fn run_triggered_drain(inner: &SyncInner, reason: &'static str) {
    if !inner.is_online() {
        debug!(reason, "Skipping drain while offline");
        return;
    }
    match inner.sync_pending_operations().await {
        Ok(result) => debug!(reason, total = result.total_operations, "Triggered drain done"),
        Err(OfflineError::SyncInProgress) => {
            debug!(reason, "Drain already running, trigger skipped")
        }
        Err(e) => warn!(reason, error = %e, "Triggered drain failed"),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
