//! # Queue Rules
//!
//! Pure functions implementing every ordering and maintenance rule of the
//! operation queue. The stateful queue in `ereceipt-offline` owns locking and
//! persistence and delegates every decision here.
//!
//! ## Ordering Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Priority-Ordered Queue                             │
//! │                                                                         │
//! │  Stored order (maintained incrementally on insert):                    │
//! │                                                                         │
//! │   [ p3@t1 ][ p3@t3 ][ p2@t2 ][ p1@t0 ]                                  │
//! │       ▲                                                                 │
//! │       │  new p3@t4 goes before the first STRICTLY lower priority:      │
//! │       │                                                                 │
//! │   [ p3@t1 ][ p3@t3 ][ p3@t4 ][ p2@t2 ][ p1@t0 ]                         │
//! │                                                                         │
//! │  Batch pull:  status == pending                                        │
//! │               ORDER BY priority DESC, created_at ASC                   │
//! │               LIMIT batch_size                                         │
//! │                                                                         │
//! │  Eviction (queue full):                                                │
//! │               lowest priority, oldest first, never `processing`,       │
//! │               only if strictly lower than the incoming priority        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::cmp::Reverse;
use std::collections::HashSet;

use crate::types::{OperationStatus, QueueStats, QueuedOperation};

// =============================================================================
// Insertion & Eviction
// =============================================================================

/// Index at which an operation of `priority` is inserted.
///
/// Immediately before the first operation with a strictly lower priority,
/// which keeps insertion order stable among equal priorities.
pub fn insertion_index(ops: &[QueuedOperation], priority: i32) -> usize {
    ops.iter()
        .position(|op| op.priority < priority)
        .unwrap_or(ops.len())
}

/// Picks the operation to evict so an incoming one of `incoming_priority` fits.
///
/// Returns the index of the true minimum-priority operation (oldest
/// `created_at` among equals), or `None` when no operation has a strictly
/// lower priority than the incoming one. In-flight operations are never
/// candidates.
pub fn eviction_candidate(ops: &[QueuedOperation], incoming_priority: i32) -> Option<usize> {
    ops.iter()
        .enumerate()
        .filter(|(_, op)| op.status != OperationStatus::Processing)
        .filter(|(_, op)| op.priority < incoming_priority)
        .min_by_key(|(_, op)| (op.priority, op.created_at))
        .map(|(index, _)| index)
}

// =============================================================================
// Reads
// =============================================================================

/// Next batch of pending operations.
///
/// Ordered by priority descending, then `created_at` ascending, truncated to
/// `batch_size`. Operations whose ids are in `exclude` are skipped.
pub fn next_batch(
    ops: &[QueuedOperation],
    batch_size: usize,
    exclude: &HashSet<String>,
) -> Vec<QueuedOperation> {
    let mut pending: Vec<&QueuedOperation> = ops
        .iter()
        .filter(|op| op.status == OperationStatus::Pending)
        .filter(|op| !exclude.contains(&op.id))
        .collect();

    // Stable sort: equal (priority, created_at) keep stored order
    pending.sort_by_key(|op| (Reverse(op.priority), op.created_at));

    pending.into_iter().take(batch_size).cloned().collect()
}

/// Operations still representing outstanding work for UI purposes.
///
/// Includes `failed` ones that have not been cleared yet.
pub fn pending_view(ops: &[QueuedOperation]) -> Vec<QueuedOperation> {
    ops.iter()
        .filter(|op| {
            matches!(
                op.status,
                OperationStatus::Pending | OperationStatus::Failed
            )
        })
        .cloned()
        .collect()
}

/// Per-status counts.
pub fn stats(ops: &[QueuedOperation]) -> QueueStats {
    ops.iter().fold(
        QueueStats {
            total: ops.len(),
            ..Default::default()
        },
        |mut stats, op| {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
            stats
        },
    )
}

// =============================================================================
// Maintenance
// =============================================================================

/// Resets operations left `processing` by a crash back to `pending`.
///
/// Returns how many were normalized.
pub fn normalize_after_restart(ops: &mut [QueuedOperation], now_millis: i64) -> usize {
    let mut normalized = 0;
    for op in ops
        .iter_mut()
        .filter(|op| op.status == OperationStatus::Processing)
    {
        op.status = OperationStatus::Pending;
        op.updated_at = now_millis;
        normalized += 1;
    }
    normalized
}

/// Moves every failed operation with remaining budget back to pending.
///
/// Returns the ids that were reset.
pub fn reset_failed(ops: &mut [QueuedOperation], now_millis: i64) -> Vec<String> {
    ops.iter_mut()
        .filter(|op| op.status == OperationStatus::Failed && op.has_retry_budget())
        .map(|op| {
            op.status = OperationStatus::Pending;
            op.error = None;
            op.updated_at = now_millis;
            op.id.clone()
        })
        .collect()
}

/// Drops every operation with the given status. Returns how many were removed.
pub fn remove_with_status(ops: &mut Vec<QueuedOperation>, status: OperationStatus) -> usize {
    let before = ops.len();
    ops.retain(|op| op.status != status);
    before - ops.len()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HttpMethod, OperationRequest, OperationType, ResourceType};

    fn op(id: &str, priority: i32, created_at: i64) -> QueuedOperation {
        let request = OperationRequest::new(
            OperationType::Create,
            ResourceType::Receipt,
            "/mf1/receipts",
            HttpMethod::Post,
        )
        .with_priority(priority);
        QueuedOperation::from_request(id.to_string(), request, created_at, 3)
    }

    /// Inserts the way the queue does.
    fn insert(ops: &mut Vec<QueuedOperation>, new: QueuedOperation) {
        let index = insertion_index(ops, new.priority);
        ops.insert(index, new);
    }

    fn ids(ops: &[QueuedOperation]) -> Vec<&str> {
        ops.iter().map(|op| op.id.as_str()).collect()
    }

    #[test]
    fn test_insertion_is_priority_ordered_and_stable() {
        let mut ops = Vec::new();
        insert(&mut ops, op("a", 1, 0));
        insert(&mut ops, op("b", 3, 1));
        insert(&mut ops, op("c", 2, 2));
        insert(&mut ops, op("d", 3, 3));

        assert_eq!(ids(&ops), vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn test_next_batch_orders_by_priority_then_age() {
        let mut ops = Vec::new();
        insert(&mut ops, op("t0", 1, 0));
        insert(&mut ops, op("t1", 3, 1));
        insert(&mut ops, op("t2", 2, 2));
        insert(&mut ops, op("t3", 3, 3));

        let batch = next_batch(&ops, 10, &HashSet::new());
        assert_eq!(ids(&batch), vec!["t1", "t3", "t2", "t0"]);

        let batch = next_batch(&ops, 2, &HashSet::new());
        assert_eq!(ids(&batch), vec!["t1", "t3"]);
    }

    #[test]
    fn test_next_batch_skips_non_pending_and_excluded() {
        let mut ops = vec![op("a", 2, 0), op("b", 2, 1), op("c", 1, 2), op("d", 1, 3)];
        ops[0].status = OperationStatus::Processing;
        ops[2].status = OperationStatus::Failed;

        let exclude: HashSet<String> = ["d".to_string()].into_iter().collect();
        let batch = next_batch(&ops, 10, &exclude);
        assert_eq!(ids(&batch), vec!["b"]);
    }

    #[test]
    fn test_next_batch_tie_breaks_on_created_at_not_position() {
        // Same priority stored out of age order (e.g. loaded from an old snapshot)
        let ops = vec![op("late", 2, 50), op("early", 2, 10)];
        let batch = next_batch(&ops, 10, &HashSet::new());
        assert_eq!(ids(&batch), vec!["early", "late"]);
    }

    #[test]
    fn test_eviction_picks_true_minimum_oldest_first() {
        let ops = vec![op("p3", 3, 0), op("p2-old", 2, 1), op("p2-new", 2, 5), op("p5", 5, 2)];

        assert_eq!(eviction_candidate(&ops, 4), Some(1));
        // Nothing strictly lower than 2
        assert_eq!(eviction_candidate(&ops, 2), None);
    }

    #[test]
    fn test_eviction_never_targets_processing() {
        let mut ops = vec![op("a", 1, 0), op("b", 1, 1)];
        ops[0].status = OperationStatus::Processing;

        assert_eq!(eviction_candidate(&ops, 2), Some(1));
        ops[1].status = OperationStatus::Processing;
        assert_eq!(eviction_candidate(&ops, 2), None);
    }

    #[test]
    fn test_stats_and_pending_view() {
        let mut ops = vec![op("a", 1, 0), op("b", 1, 1), op("c", 1, 2), op("d", 1, 3)];
        ops[1].status = OperationStatus::Processing;
        ops[2].status = OperationStatus::Completed;
        ops[3].status = OperationStatus::Failed;

        let stats = stats(&ops);
        assert_eq!(
            stats,
            QueueStats {
                total: 4,
                pending: 1,
                processing: 1,
                completed: 1,
                failed: 1,
            }
        );
        assert_eq!(ids(&pending_view(&ops)), vec!["a", "d"]);
    }

    #[test]
    fn test_normalize_after_restart() {
        let mut ops = vec![op("a", 1, 0), op("b", 1, 1)];
        ops[0].status = OperationStatus::Processing;

        assert_eq!(normalize_after_restart(&mut ops, 99), 1);
        assert_eq!(ops[0].status, OperationStatus::Pending);
        assert_eq!(ops[0].updated_at, 99);
        assert_eq!(ops[1].updated_at, 1);
    }

    #[test]
    fn test_reset_failed_respects_budget() {
        let mut ops = vec![op("ok", 1, 0), op("spent", 1, 1)];
        for op in ops.iter_mut() {
            op.status = OperationStatus::Failed;
            op.error = Some("HTTP 400".into());
        }
        ops[1].retry_count = ops[1].max_retries;

        let reset = reset_failed(&mut ops, 10);
        assert_eq!(reset, vec!["ok".to_string()]);
        assert_eq!(ops[0].status, OperationStatus::Pending);
        assert!(ops[0].error.is_none());
        assert_eq!(ops[1].status, OperationStatus::Failed);
    }

    #[test]
    fn test_remove_with_status() {
        let mut ops = vec![op("a", 1, 0), op("b", 1, 1), op("c", 1, 2)];
        ops[0].status = OperationStatus::Completed;
        ops[2].status = OperationStatus::Completed;

        assert_eq!(remove_with_status(&mut ops, OperationStatus::Completed), 2);
        assert_eq!(ids(&ops), vec!["b"]);
    }
}
