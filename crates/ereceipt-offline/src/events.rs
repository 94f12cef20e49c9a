//! # Offline Events
//!
//! Push notifications fired by the queue and the sync manager.
//!
//! ```text
//! OperationQueue ──┐
//!                  ├──► EventBus (broadcast) ──► OfflineManager state task
//! SyncManager ─────┘                        ├──► offline-agent logger
//!                                           └──► UI bindings
//! ```
//!
//! Slow subscribers lag and skip events rather than blocking the engine.

use serde::Serialize;
use tokio::sync::broadcast;

use ereceipt_core::{BatchSyncResult, OperationStatus, QueuedOperation, SyncResult};

/// Which operations a clear call removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    All,
    Completed,
    Failed,
}

/// Engine notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OfflineEvent {
    OperationAdded { operation: QueuedOperation },
    OperationUpdated { id: String, status: OperationStatus },
    OperationRemoved { id: String },
    /// Dropped to make room for a higher-priority operation.
    OperationEvicted { id: String, priority: i32 },
    QueueCleared { scope: ClearScope, removed: usize },
    OperationCompleted { result: SyncResult },
    OperationFailed { result: SyncResult },
    RetryScheduled {
        id: String,
        retry_count: u32,
        delay_ms: u64,
    },
    SyncStarted,
    BatchSyncCompleted { result: BatchSyncResult },
    QueueEmpty,
    ConnectivityChanged { online: bool },
    /// Non-fatal failure, e.g. a snapshot that could not be persisted.
    Error { context: String, message: String },
}

impl OfflineEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OfflineEvent::OperationAdded { .. } => "operation_added",
            OfflineEvent::OperationUpdated { .. } => "operation_updated",
            OfflineEvent::OperationRemoved { .. } => "operation_removed",
            OfflineEvent::OperationEvicted { .. } => "operation_evicted",
            OfflineEvent::QueueCleared { .. } => "queue_cleared",
            OfflineEvent::OperationCompleted { .. } => "operation_completed",
            OfflineEvent::OperationFailed { .. } => "operation_failed",
            OfflineEvent::RetryScheduled { .. } => "retry_scheduled",
            OfflineEvent::SyncStarted => "sync_started",
            OfflineEvent::BatchSyncCompleted { .. } => "batch_sync_completed",
            OfflineEvent::QueueEmpty => "queue_empty",
            OfflineEvent::ConnectivityChanged { .. } => "connectivity_changed",
            OfflineEvent::Error { .. } => "error",
        }
    }

    pub(crate) fn error(context: impl Into<String>, message: impl Into<String>) -> Self {
        OfflineEvent::Error {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Cloneable handle on the event broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OfflineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Fires an event. Having no subscribers is fine.
    pub fn emit(&self, event: OfflineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OfflineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
