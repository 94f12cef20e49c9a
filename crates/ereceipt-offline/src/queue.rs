//! # Operation Queue
//!
//! Durable, bounded, priority-ordered collection of pending mutating
//! requests. The sole source of truth for pending work; knows nothing about
//! networking.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Mutating Call                                   │
//! │                                                                         │
//! │  add_operation / update_operation / remove / clear_* / retry_failed    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  lock ops (tokio Mutex)                                                │
//! │       │                                                                 │
//! │       ├── apply rule (ereceipt_core::rules)                            │
//! │       │                                                                 │
//! │       ├── persist full snapshot under one key (lock still held)        │
//! │       │      └── failure → OfflineEvent::Error, call still succeeds    │
//! │       │                                                                 │
//! │       └── emit OfflineEvent                                             │
//! │                                                                         │
//! │  Reads (next batch, stats) are served from the in-memory copy.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Processing Flag
//! A single cooperative flag excludes whole drain passes. It is taken with a
//! compare-and-swap through [`OperationQueue::try_begin_processing`] and
//! released when the returned [`ProcessingGuard`] drops.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use ereceipt_core::validation::{validate_queue_limits, validate_request};
use ereceipt_core::{
    rules, Clock, OperationRequest, OperationStatus, OperationUpdate, QueueSnapshot, QueueStats,
    QueuedOperation,
};
use ereceipt_store::Storage;

use crate::config::QueueSettings;
use crate::error::{OfflineError, OfflineResult};
use crate::events::{ClearScope, EventBus, OfflineEvent};

// =============================================================================
// Operation Queue
// =============================================================================

pub struct OperationQueue {
    settings: QueueSettings,
    ops: Mutex<Vec<QueuedOperation>>,
    processing: AtomicBool,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("settings", &self.settings)
            .field("processing", &self.processing)
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    /// Loads the queue from storage.
    ///
    /// ## Load Steps
    /// 1. Read the snapshot under `settings.storage_key`
    /// 2. Decode it (legacy bare arrays are migrated)
    /// 3. Normalize `processing` leftovers from a crash back to `pending`
    /// 4. Trim to `max_queue_size` if the limit shrank since the last run
    ///
    /// A snapshot that doesn't decode (corrupt, or written by a newer
    /// version) is copied to `{storage_key}.corrupt.{now}` before the queue
    /// starts empty, and reported as an error event. Fails when settings are
    /// invalid, when the snapshot can't be read, or when the quarantine copy
    /// can't be written.
    pub async fn load(
        settings: QueueSettings,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> OfflineResult<Self> {
        validate_queue_limits(settings.max_queue_size, settings.batch_size)
            .map_err(|e| OfflineError::InvalidConfig(e.to_string()))?;

        let now = clock.now_millis();
        let raw = storage.get(&settings.storage_key).await.map_err(|e| {
            error!(error = %e, "Failed to read queue snapshot");
            OfflineError::from(e)
        })?;

        let mut ops = match raw {
            Some(raw) => match QueueSnapshot::decode(&raw) {
                Ok(snapshot) => snapshot.operations,
                Err(e) => {
                    let quarantine_key = format!("{}.corrupt.{}", settings.storage_key, now);
                    storage.set(&quarantine_key, &raw).await.map_err(|store_err| {
                        error!(error = %store_err, "Failed to quarantine unreadable queue snapshot");
                        OfflineError::from(store_err)
                    })?;
                    error!(error = %e, quarantine_key = %quarantine_key, "Quarantined unreadable queue snapshot");
                    events.emit(OfflineEvent::error(
                        "load",
                        format!("{} (kept under '{}')", e, quarantine_key),
                    ));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let normalized = rules::normalize_after_restart(&mut ops, now);
        if normalized > 0 {
            info!(count = normalized, "Reset in-flight operations left by a previous run");
        }

        // Snapshots from older versions may not be stored in priority order
        ops.sort_by_key(|op| std::cmp::Reverse(op.priority));

        let queue = OperationQueue {
            settings,
            ops: Mutex::new(ops),
            processing: AtomicBool::new(false),
            storage,
            clock,
            events,
        };

        {
            let mut ops = queue.ops.lock().await;
            let mut evicted = Vec::new();
            while ops.len() > queue.settings.max_queue_size {
                match rules::eviction_candidate(&ops, i32::MAX) {
                    Some(index) => evicted.push(ops.remove(index)),
                    None => {
                        let last = ops.len() - 1;
                        evicted.push(ops.remove(last));
                    }
                }
            }
            if normalized > 0 || !evicted.is_empty() {
                queue.persist(&ops).await;
            }
            for op in evicted {
                warn!(operation_id = %op.id, priority = op.priority, "Evicted on load, queue limit shrank");
                queue.events.emit(OfflineEvent::OperationEvicted {
                    id: op.id,
                    priority: op.priority,
                });
            }
            info!(operations = ops.len(), "Operation queue loaded");
        }

        Ok(queue)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Enqueues an operation and returns its id.
    ///
    /// At capacity, the lowest-priority operation (oldest first) is evicted
    /// if its priority is strictly lower than the incoming one; otherwise the
    /// call fails with [`OfflineError::QueueFull`] and nothing is added.
    pub async fn add_operation(&self, request: OperationRequest) -> OfflineResult<String> {
        validate_request(&request)?;

        let mut ops = self.ops.lock().await;

        let mut evicted = None;
        if ops.len() >= self.settings.max_queue_size {
            match rules::eviction_candidate(&ops, request.priority) {
                Some(index) => evicted = Some(ops.remove(index)),
                None => {
                    warn!(
                        priority = request.priority,
                        max_size = self.settings.max_queue_size,
                        "Queue full, rejecting operation"
                    );
                    return Err(OfflineError::QueueFull {
                        max_size: self.settings.max_queue_size,
                        priority: request.priority,
                    });
                }
            }
        }

        let op = QueuedOperation::from_request(
            QueuedOperation::generate_id(),
            request,
            self.clock.now_millis(),
            self.settings.default_max_retries,
        );
        let id = op.id.clone();

        let index = rules::insertion_index(&ops, op.priority);
        ops.insert(index, op.clone());
        self.persist(&ops).await;

        if let Some(old) = evicted {
            info!(
                operation_id = %old.id,
                priority = old.priority,
                "Evicted lower-priority operation"
            );
            self.events.emit(OfflineEvent::OperationEvicted {
                id: old.id,
                priority: old.priority,
            });
        }

        info!(
            operation_id = %id,
            resource = %op.resource,
            method = %op.method,
            endpoint = %op.endpoint,
            priority = op.priority,
            "Operation queued"
        );
        self.events.emit(OfflineEvent::OperationAdded { operation: op });

        Ok(id)
    }

    /// Merges `update` into an operation and persists it.
    ///
    /// Returns `Ok(false)` if no operation has that id. Status changes must
    /// follow the legal transition table, and an operation whose retry count
    /// has reached its budget never goes back to `pending`.
    pub async fn update_operation(&self, id: &str, update: OperationUpdate) -> OfflineResult<bool> {
        let mut ops = self.ops.lock().await;

        let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
            return Ok(false);
        };

        if let Some(next) = update.status {
            if !op.status.can_transition_to(next) {
                return Err(OfflineError::InvalidTransition {
                    id: id.to_string(),
                    from: op.status,
                    to: next,
                });
            }
            let requeue = next == OperationStatus::Pending && op.status != OperationStatus::Pending;
            if requeue && !op.has_retry_budget() {
                return Err(OfflineError::RetryBudgetExhausted {
                    id: id.to_string(),
                    retry_count: op.retry_count,
                    max_retries: op.max_retries,
                });
            }
        }

        update.apply(op, self.clock.now_millis());
        let status = op.status;
        debug!(operation_id = %id, %status, retry_count = op.retry_count, "Operation updated");

        self.persist(&ops).await;
        self.events.emit(OfflineEvent::OperationUpdated {
            id: id.to_string(),
            status,
        });

        Ok(true)
    }

    /// Removes an operation. Returns false if it wasn't queued.
    pub async fn remove_operation(&self, id: &str) -> bool {
        let mut ops = self.ops.lock().await;

        let Some(index) = ops.iter().position(|op| op.id == id) else {
            return false;
        };
        ops.remove(index);
        self.persist(&ops).await;

        debug!(operation_id = %id, "Operation removed");
        self.events.emit(OfflineEvent::OperationRemoved { id: id.to_string() });
        true
    }

    /// Drops every operation.
    pub async fn clear_queue(&self) -> usize {
        let mut ops = self.ops.lock().await;
        let removed = ops.len();
        ops.clear();
        self.persist(&ops).await;

        info!(removed, "Queue cleared");
        self.events.emit(OfflineEvent::QueueCleared {
            scope: ClearScope::All,
            removed,
        });
        removed
    }

    /// Drops completed operations.
    pub async fn clear_completed(&self) -> usize {
        self.clear_status(OperationStatus::Completed, ClearScope::Completed)
            .await
    }

    /// Drops failed operations.
    pub async fn clear_failed(&self) -> usize {
        self.clear_status(OperationStatus::Failed, ClearScope::Failed)
            .await
    }

    async fn clear_status(&self, status: OperationStatus, scope: ClearScope) -> usize {
        let mut ops = self.ops.lock().await;
        let removed = rules::remove_with_status(&mut ops, status);
        if removed > 0 {
            self.persist(&ops).await;
        }

        debug!(removed, %status, "Cleared operations");
        self.events.emit(OfflineEvent::QueueCleared { scope, removed });
        removed
    }

    /// Moves failed operations with remaining budget back to pending.
    ///
    /// Returns the ids that were re-queued.
    pub async fn retry_failed(&self) -> Vec<String> {
        let mut ops = self.ops.lock().await;
        let reset = rules::reset_failed(&mut ops, self.clock.now_millis());
        if reset.is_empty() {
            return reset;
        }

        self.persist(&ops).await;
        info!(count = reset.len(), "Failed operations re-queued");
        for id in &reset {
            self.events.emit(OfflineEvent::OperationUpdated {
                id: id.clone(),
                status: OperationStatus::Pending,
            });
        }
        reset
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Next batch: pending only, priority desc, then oldest first.
    pub async fn get_next_batch(&self) -> Vec<QueuedOperation> {
        self.next_batch_excluding(&HashSet::new()).await
    }

    /// Next batch skipping operations already attempted by the caller.
    pub async fn next_batch_excluding(&self, exclude: &HashSet<String>) -> Vec<QueuedOperation> {
        let ops = self.ops.lock().await;
        rules::next_batch(&ops, self.settings.batch_size, exclude)
    }

    /// Pending and failed-but-not-cleared operations, in stored order.
    pub async fn get_pending_operations(&self) -> Vec<QueuedOperation> {
        rules::pending_view(&self.ops.lock().await)
    }

    pub async fn get_operation(&self, id: &str) -> Option<QueuedOperation> {
        self.ops.lock().await.iter().find(|op| op.id == id).cloned()
    }

    /// Every operation, in stored (priority) order.
    pub async fn get_all_operations(&self) -> Vec<QueuedOperation> {
        self.ops.lock().await.clone()
    }

    pub async fn get_stats(&self) -> QueueStats {
        rules::stats(&self.ops.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.ops.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ops.lock().await.is_empty()
    }

    /// True if any pending operation is not in `exclude`.
    pub async fn has_pending_excluding(&self, exclude: &HashSet<String>) -> bool {
        self.ops
            .lock()
            .await
            .iter()
            .any(|op| op.status == OperationStatus::Pending && !exclude.contains(&op.id))
    }

    // =========================================================================
    // Processing Flag
    // =========================================================================

    pub fn is_currently_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Sets the flag unconditionally. Prefer [`Self::try_begin_processing`].
    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::Release);
    }

    /// Takes the flag if nobody holds it.
    pub fn try_begin_processing(&self) -> Option<ProcessingGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard {
                flag: &self.processing,
            })
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Writes the full snapshot. Failures become error events.
    async fn persist(&self, ops: &[QueuedOperation]) {
        let raw = match QueueSnapshot::encode(ops) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Failed to encode queue snapshot");
                self.events.emit(OfflineEvent::error("persist", e.to_string()));
                return;
            }
        };

        if let Err(e) = self.storage.set(&self.settings.storage_key, &raw).await {
            warn!(error = %e, "Failed to persist queue snapshot");
            self.events.emit(OfflineEvent::error("persist", e.to_string()));
        }
    }
}

// =============================================================================
// Processing Guard
// =============================================================================

/// Clears the processing flag when dropped, on every exit path.
#[derive(Debug)]
pub struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
