//! # Offline Manager
//!
//! Owns the operation queue and the sync manager for their shared lifetime
//! and publishes one aggregated, push-based view of both.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          OfflineManager                                 │
//! │                                                                         │
//! │   queue_receipt_creation(..) ─┐                                        │
//! │   queue_cashier_update(..)   ─┼──► queue_operation ──► OperationQueue  │
//! │   queue_operation(request)   ─┘                             │          │
//! │                                                             │ events   │
//! │   trigger_sync / retry_failed ──► SyncManager ──────────────┤          │
//! │                                                             ▼          │
//! │                                           EventBus ──► state task      │
//! │                                                             │          │
//! │                                                             ▼          │
//! │                              watch<OfflineState> ──► subscribe_state() │
//! │                                                                         │
//! │   destroy() ──► SyncManager::destroy + state task stop                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State is refreshed right after every mutating call made through the
//! manager and again, asynchronously, after every event from either child.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ereceipt_core::{
    BatchSyncResult, Clock, HttpMethod, OperationRequest, OperationType, QueueStats,
    QueuedOperation, ResourceType, SystemClock,
};
use ereceipt_store::Storage;

use crate::config::OfflineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::OfflineResult;
use crate::events::{EventBus, OfflineEvent};
use crate::queue::OperationQueue;
use crate::sync::{SyncManager, SyncStatus};
use crate::transport::Transport;

// =============================================================================
// Aggregated State
// =============================================================================

/// Everything a UI needs to render the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineState {
    pub pending_operations: Vec<QueuedOperation>,
    pub stats: QueueStats,
    pub sync_status: SyncStatus,
}

// =============================================================================
// Offline Manager
// =============================================================================

pub struct OfflineManager {
    queue: Arc<OperationQueue>,
    sync: SyncManager,
    events: EventBus,
    state_tx: Arc<watch::Sender<OfflineState>>,
    state_task: JoinHandle<()>,
}

impl OfflineManager {
    /// Loads the queue and starts the sync engine with the wall clock.
    pub async fn new(
        config: &OfflineConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        connectivity: &ConnectivityMonitor,
    ) -> OfflineResult<Self> {
        Self::with_clock(config, storage, transport, connectivity, Arc::new(SystemClock)).await
    }

    /// Same as [`OfflineManager::new`] with an explicit clock.
    pub async fn with_clock(
        config: &OfflineConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        connectivity: &ConnectivityMonitor,
        clock: Arc<dyn Clock>,
    ) -> OfflineResult<Self> {
        config.validate()?;

        let events = EventBus::new(config.sync.event_capacity);
        let queue = Arc::new(
            OperationQueue::load(config.queue.clone(), storage, clock, events.clone()).await?,
        );
        let sync = SyncManager::new(
            queue.clone(),
            transport,
            &config.sync,
            connectivity.subscribe(),
            events.clone(),
        );

        let (state_tx, _) = watch::channel(build_state(&queue, &sync).await);
        let state_tx = Arc::new(state_tx);
        let state_task = tokio::spawn(track_state(
            events.subscribe(),
            queue.clone(),
            sync.clone(),
            state_tx.clone(),
        ));

        info!(
            max_queue_size = config.queue.max_queue_size,
            batch_size = config.queue.batch_size,
            "Offline manager ready"
        );

        Ok(OfflineManager {
            queue,
            sync,
            events,
            state_tx,
            state_task,
        })
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Enqueues an arbitrary request.
    pub async fn queue_operation(&self, request: OperationRequest) -> OfflineResult<String> {
        let id = self.queue.add_operation(request).await?;
        self.refresh_state().await;
        Ok(id)
    }

    pub async fn queue_receipt_creation(&self, receipt: Value) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Create,
                ResourceType::Receipt,
                "/mf1/receipts",
                HttpMethod::Post,
            )
            .with_data(receipt)
            .with_priority(3),
        )
        .await
    }

    pub async fn queue_receipt_void(&self, void_request: Value) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Delete,
                ResourceType::Receipt,
                "/mf1/receipts",
                HttpMethod::Delete,
            )
            .with_data(void_request)
            .with_priority(3),
        )
        .await
    }

    pub async fn queue_receipt_return(&self, return_request: Value) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Create,
                ResourceType::Receipt,
                "/mf1/receipts/return",
                HttpMethod::Post,
            )
            .with_data(return_request)
            .with_priority(3),
        )
        .await
    }

    pub async fn queue_cashier_creation(&self, cashier: Value) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Create,
                ResourceType::Cashier,
                "/mf1/cashiers",
                HttpMethod::Post,
            )
            .with_data(cashier)
            .with_priority(2),
        )
        .await
    }

    pub async fn queue_cashier_update(&self, cashier_id: &str, changes: Value) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Update,
                ResourceType::Cashier,
                format!("/mf1/cashiers/{}", cashier_id),
                HttpMethod::Put,
            )
            .with_data(changes)
            .with_priority(2),
        )
        .await
    }

    pub async fn queue_cashier_deletion(&self, cashier_id: &str) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Delete,
                ResourceType::Cashier,
                format!("/mf1/cashiers/{}", cashier_id),
                HttpMethod::Delete,
            )
            .with_priority(2),
        )
        .await
    }

    pub async fn queue_merchant_update(&self, merchant_id: &str, changes: Value) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Update,
                ResourceType::Merchant,
                format!("/mf2/merchants/{}", merchant_id),
                HttpMethod::Put,
            )
            .with_data(changes)
            .with_priority(1),
        )
        .await
    }

    pub async fn queue_point_of_sale_activation(
        &self,
        serial_number: &str,
        activation: Value,
    ) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Update,
                ResourceType::PointOfSale,
                format!("/mf1/point-of-sales/{}/activation", serial_number),
                HttpMethod::Post,
            )
            .with_data(activation)
            .with_priority(2),
        )
        .await
    }

    pub async fn queue_point_of_sale_close_journal(&self, serial_number: &str) -> OfflineResult<String> {
        self.queue_operation(
            OperationRequest::new(
                OperationType::Update,
                ResourceType::PointOfSale,
                format!("/mf1/point-of-sales/{}/close-journal", serial_number),
                HttpMethod::Post,
            )
            .with_priority(2),
        )
        .await
    }

    // =========================================================================
    // Queue Maintenance
    // =========================================================================

    pub async fn remove_operation(&self, id: &str) -> bool {
        let removed = self.queue.remove_operation(id).await;
        self.refresh_state().await;
        removed
    }

    pub async fn clear_queue(&self) -> usize {
        let removed = self.queue.clear_queue().await;
        self.refresh_state().await;
        removed
    }

    pub async fn clear_completed(&self) -> usize {
        let removed = self.queue.clear_completed().await;
        self.refresh_state().await;
        removed
    }

    pub async fn clear_failed(&self) -> usize {
        let removed = self.queue.clear_failed().await;
        self.refresh_state().await;
        removed
    }

    /// Re-queues failed operations with budget left and, when online, kicks
    /// off a sync in the background. Returns how many were re-queued.
    pub async fn retry_failed(&self) -> usize {
        let reset = self.queue.retry_failed().await;
        self.refresh_state().await;

        if !reset.is_empty() && self.sync.is_online() {
            let sync = self.sync.clone();
            tokio::spawn(async move {
                if let Err(e) = sync.trigger_sync().await {
                    debug!(error = %e, "Sync after retry_failed skipped");
                }
            });
        }
        reset.len()
    }

    // =========================================================================
    // Sync
    // =========================================================================

    pub async fn trigger_sync(&self) -> OfflineResult<Option<BatchSyncResult>> {
        let result = self.sync.trigger_sync().await;
        self.refresh_state().await;
        result
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        self.sync.get_sync_status().await
    }

    pub fn is_online(&self) -> bool {
        self.sync.is_online()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_pending_operations(&self) -> Vec<QueuedOperation> {
        self.queue.get_pending_operations().await
    }

    pub async fn get_operation(&self, id: &str) -> Option<QueuedOperation> {
        self.queue.get_operation(id).await
    }

    pub async fn get_all_operations(&self) -> Vec<QueuedOperation> {
        self.queue.get_all_operations().await
    }

    pub async fn get_stats(&self) -> QueueStats {
        self.queue.get_stats().await
    }

    /// Latest aggregated state.
    pub fn state(&self) -> OfflineState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OfflineState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OfflineEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops sync scheduling and state tracking. In-flight requests finish.
    pub fn destroy(&self) {
        self.sync.destroy();
        self.state_task.abort();
    }

    async fn refresh_state(&self) {
        self.state_tx
            .send_replace(build_state(&self.queue, &self.sync).await);
    }
}

impl Drop for OfflineManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn build_state(queue: &OperationQueue, sync: &SyncManager) -> OfflineState {
    OfflineState {
        pending_operations: queue.get_pending_operations().await,
        stats: queue.get_stats().await,
        sync_status: sync.get_sync_status().await,
    }
}

async fn track_state(
    mut events: broadcast::Receiver<OfflineEvent>,
    queue: Arc<OperationQueue>,
    sync: SyncManager,
    state_tx: Arc<watch::Sender<OfflineState>>,
) {
    loop {
        match events.recv().await {
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "State tracker lagged behind events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        state_tx.send_replace(build_state(&queue, &sync).await);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
