//! Queue and sync invariants under varied inputs.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{queue_settings, request, wait_for, Harness, Reply, ScriptedTransport};
use ereceipt_core::{
    ManualClock, OperationStatus, OperationUpdate, QueueSnapshot, QueuedOperation,
    QUEUE_STORAGE_KEY,
};
use ereceipt_offline::{EventBus, OfflineError, OfflineEvent, OperationQueue, QueueSettings};
use ereceipt_store::{MemoryStorage, Storage};

/// Deterministic pseudo-random priorities and clock steps.
fn sequence(len: usize, seed: u64) -> Vec<(i32, i64)> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let priority = ((state >> 33) % 5) as i32;
            let step = ((state >> 17) % 3) as i64; // 0 produces equal timestamps
            (priority, step)
        })
        .collect()
}

// =============================================================================
// Ordering & Bounds
// =============================================================================

#[tokio::test]
async fn test_batches_are_always_priority_then_age_ordered() {
    for seed in [1, 7, 42, 1337] {
        let h = Harness::with(false, queue_settings(1000, 1000), ScriptedTransport::new()).await;
        for (priority, step) in sequence(60, seed) {
            h.clock.advance(step);
            h.queue
                .add_operation(request(priority, "/mf1/receipts"))
                .await
                .unwrap();
        }

        let batch = h.queue.get_next_batch().await;
        assert_eq!(batch.len(), 60);
        for pair in batch.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                assert!(pair[0].created_at <= pair[1].created_at);
            }
        }
    }
}

#[tokio::test]
async fn test_queue_never_exceeds_its_bound() {
    let h = Harness::with(false, queue_settings(5, 2), ScriptedTransport::new()).await;

    for (priority, step) in sequence(200, 99) {
        h.clock.advance(step);
        let before = h.queue.len().await;
        let min_before = h
            .queue
            .get_all_operations()
            .await
            .iter()
            .map(|op| op.priority)
            .min();

        match h.queue.add_operation(request(priority, "/mf1/receipts")).await {
            Ok(_) => {
                let after = h.queue.len().await;
                assert!(after == before + 1 || (before == 5 && after == 5));
            }
            Err(OfflineError::QueueFull { .. }) => {
                assert_eq!(before, 5);
                assert!(min_before.unwrap_or(i32::MIN) >= priority);
            }
            Err(e) => panic!("unexpected error {}", e),
        }
        assert!(h.queue.len().await <= 5);
    }

    assert_eq!(h.queue.get_next_batch().await.len(), 2);
}

// =============================================================================
// Status Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_completed_operations_are_never_replayed() {
    let h = Harness::new(true).await;
    let id = h.add(1, "/mf1/receipts").await;

    h.sync.sync_pending_operations().await.unwrap();
    h.sync.sync_pending_operations().await.unwrap();
    assert!(h.sync.trigger_sync().await.unwrap().unwrap().is_empty());
    assert_eq!(h.transport.calls_to("/mf1/receipts"), 1);

    let err = h
        .queue
        .update_operation(&id, OperationUpdate::status(OperationStatus::Pending))
        .await
        .unwrap_err();
    assert!(matches!(err, OfflineError::InvalidTransition { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_never_returns_to_pending() {
    let transport = ScriptedTransport::new();
    transport.script("/mf1/receipts", [Reply::Network, Reply::Network]);
    let h = Harness::with(true, Default::default(), transport).await;
    let mut events = h.events.subscribe();

    let id = h
        .queue
        .add_operation(request(1, "/mf1/receipts").with_max_retries(1))
        .await
        .unwrap();

    h.sync.sync_pending_operations().await.unwrap();
    assert_eq!(h.queue.get_operation(&id).await.unwrap().retry_count, 1);

    // Second attempt comes from the scheduled retry and exhausts the budget
    wait_for(&mut events, |e| matches!(e, OfflineEvent::OperationFailed { .. })).await;
    let op = h.queue.get_operation(&id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.retry_count, 1);
    assert_eq!(h.transport.calls_to("/mf1/receipts"), 2);

    let err = h
        .queue
        .update_operation(&id, OperationUpdate::status(OperationStatus::Pending))
        .await
        .unwrap_err();
    assert!(matches!(err, OfflineError::RetryBudgetExhausted { .. }));
    assert!(h.queue.retry_failed().await.is_empty());
}

#[tokio::test]
async fn test_processing_to_pending_respects_budget() {
    let h = Harness::new(false).await;
    let id = h
        .queue
        .add_operation(request(1, "/mf1/receipts").with_max_retries(0))
        .await
        .unwrap();

    h.queue
        .update_operation(&id, OperationUpdate::status(OperationStatus::Processing))
        .await
        .unwrap();
    let err = h
        .queue
        .update_operation(&id, OperationUpdate::status(OperationStatus::Pending))
        .await
        .unwrap_err();
    assert!(matches!(err, OfflineError::RetryBudgetExhausted { .. }));
}

// =============================================================================
// Persistence
// =============================================================================

async fn try_load(
    storage: Arc<MemoryStorage>,
    events: EventBus,
) -> Result<OperationQueue, OfflineError> {
    OperationQueue::load(
        QueueSettings::default(),
        storage,
        Arc::new(ManualClock::new(50_000)),
        events,
    )
    .await
}

async fn load(storage: Arc<MemoryStorage>, events: EventBus) -> OperationQueue {
    try_load(storage, events).await.unwrap()
}

fn quarantine_key() -> String {
    format!("{}.corrupt.50000", QUEUE_STORAGE_KEY)
}

fn membership(ops: &[QueuedOperation], status: OperationStatus) -> BTreeSet<String> {
    ops.iter()
        .filter(|op| op.status == status)
        .map(|op| op.id.clone())
        .collect()
}

#[tokio::test]
async fn test_reload_preserves_membership() {
    let h = Harness::new(false).await;
    let done = h.add(3, "/a").await;
    let broken = h.add(2, "/b").await;
    let in_flight = h.add(2, "/c").await;
    h.add(1, "/d").await;

    for (id, end) in [
        (&done, Some(OperationStatus::Completed)),
        (&broken, Some(OperationStatus::Failed)),
        (&in_flight, None),
    ] {
        h.queue
            .update_operation(id, OperationUpdate::status(OperationStatus::Processing))
            .await
            .unwrap();
        if let Some(end) = end {
            h.queue
                .update_operation(id, OperationUpdate::status(end))
                .await
                .unwrap();
        }
    }
    let before = h.queue.get_all_operations().await;

    let reloaded = load(h.storage.clone(), EventBus::new(16)).await;
    let after = reloaded.get_all_operations().await;

    assert_eq!(after.len(), before.len());
    assert_eq!(membership(&after, OperationStatus::Processing), BTreeSet::new());
    assert_eq!(
        membership(&after, OperationStatus::Pending),
        &membership(&before, OperationStatus::Pending) | &membership(&before, OperationStatus::Processing)
    );
    for status in [OperationStatus::Completed, OperationStatus::Failed] {
        assert_eq!(membership(&after, status), membership(&before, status));
    }

    let normalized = reloaded.get_operation(&in_flight).await.unwrap();
    assert_eq!(normalized.updated_at, 50_000);

    // Normalization is written back
    let raw = h.storage.get(QUEUE_STORAGE_KEY).await.unwrap().unwrap();
    let snapshot = QueueSnapshot::decode(&raw).unwrap();
    assert!(snapshot
        .operations
        .iter()
        .all(|op| op.status != OperationStatus::Processing));
}

#[tokio::test]
async fn test_persistence_failure_keeps_memory_authoritative() {
    let storage = Arc::new(MemoryStorage::new());
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let queue = load(storage.clone(), events).await;

    storage.set_fail_writes(true);
    let id = queue
        .add_operation(request(1, "/mf1/receipts"))
        .await
        .unwrap();

    assert!(queue.get_operation(&id).await.is_some());
    assert!(storage.get(QUEUE_STORAGE_KEY).await.unwrap().is_none());

    let event = wait_for(&mut rx, |e| matches!(e, OfflineEvent::Error { .. })).await;
    match event {
        OfflineEvent::Error { context, .. } => assert_eq!(context, "persist"),
        other => panic!("unexpected event {:?}", other),
    }

    // Next successful write carries the whole queue
    storage.set_fail_writes(false);
    queue
        .add_operation(request(2, "/mf1/cashiers"))
        .await
        .unwrap();
    let raw = storage.get(QUEUE_STORAGE_KEY).await.unwrap().unwrap();
    assert_eq!(QueueSnapshot::decode(&raw).unwrap().operations.len(), 2);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_quarantined() {
    let storage = Arc::new(MemoryStorage::with_entry(QUEUE_STORAGE_KEY, "{not json"));
    let events = EventBus::new(16);
    let mut rx = events.subscribe();

    let queue = load(storage.clone(), events).await;

    assert!(queue.is_empty().await);
    let event = wait_for(&mut rx, |e| matches!(e, OfflineEvent::Error { .. })).await;
    match event {
        OfflineEvent::Error { context, message } => {
            assert_eq!(context, "load");
            assert!(message.contains(&quarantine_key()));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        storage.get(&quarantine_key()).await.unwrap().as_deref(),
        Some("{not json")
    );
}

#[tokio::test]
async fn test_newer_snapshot_survives_enqueue() {
    let newer = r#"{"version":2,"operations":[{"id":"keep-me"}]}"#;
    let storage = Arc::new(MemoryStorage::with_entry(QUEUE_STORAGE_KEY, newer));

    let queue = load(storage.clone(), EventBus::new(16)).await;
    queue
        .add_operation(request(1, "/mf1/receipts"))
        .await
        .unwrap();

    // The live key now holds the new queue, the old one is kept aside
    let live = storage.get(QUEUE_STORAGE_KEY).await.unwrap().unwrap();
    assert_eq!(QueueSnapshot::decode(&live).unwrap().operations.len(), 1);
    assert_eq!(
        storage.get(&quarantine_key()).await.unwrap().as_deref(),
        Some(newer)
    );
}

#[tokio::test]
async fn test_read_failure_fails_load() {
    let original = QueueSnapshot::encode(&[QueuedOperation::from_request(
        "stored-1".into(),
        request(2, "/mf1/receipts"),
        10,
        3,
    )])
    .unwrap();
    let storage = Arc::new(MemoryStorage::with_entry(QUEUE_STORAGE_KEY, original.clone()));
    storage.set_fail_reads(true);

    let err = try_load(storage.clone(), EventBus::new(16)).await.unwrap_err();
    assert!(matches!(err, OfflineError::Storage(_)));
    assert_eq!(storage.write_count(), 0);

    // Once reads work again nothing was lost
    storage.set_fail_reads(false);
    assert_eq!(
        storage.get(QUEUE_STORAGE_KEY).await.unwrap().as_deref(),
        Some(original.as_str())
    );
    let queue = load(storage, EventBus::new(16)).await;
    assert!(queue.get_operation("stored-1").await.is_some());
}

#[tokio::test]
async fn test_failed_quarantine_fails_load() {
    let storage = Arc::new(MemoryStorage::with_entry(QUEUE_STORAGE_KEY, "{not json"));
    storage.set_fail_writes(true);

    let err = try_load(storage.clone(), EventBus::new(16)).await.unwrap_err();

    assert!(matches!(err, OfflineError::Storage(_)));
    assert_eq!(
        storage.get(QUEUE_STORAGE_KEY).await.unwrap().as_deref(),
        Some("{not json")
    );
}

#[tokio::test]
async fn test_legacy_array_snapshot_is_migrated() {
    let op = QueuedOperation::from_request("legacy-1".into(), request(2, "/mf1/receipts"), 10, 3);
    let legacy = serde_json::to_string(&vec![op]).unwrap();
    let storage = Arc::new(MemoryStorage::with_entry(QUEUE_STORAGE_KEY, legacy));

    let queue = load(storage, EventBus::new(16)).await;

    let loaded = queue.get_operation("legacy-1").await.unwrap();
    assert_eq!(loaded.priority, 2);
    assert_eq!(loaded.status, OperationStatus::Pending);
}

// =============================================================================
// Drain Mechanics
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_requests_overlap() {
    let h = Harness::with(
        true,
        Default::default(),
        ScriptedTransport::with_latency(Duration::from_millis(100)),
    )
    .await;
    for _ in 0..3 {
        h.add(1, "/mf1/receipts").await;
    }

    let started = tokio::time::Instant::now();
    let result = h.sync.sync_pending_operations().await.unwrap();

    assert_eq!(result.success_count, 3);
    assert_eq!(h.transport.max_in_flight(), 3);
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_pause_between_batches() {
    let h = Harness::with(true, queue_settings(100, 2), ScriptedTransport::new()).await;
    for _ in 0..5 {
        h.add(1, "/mf1/receipts").await;
    }

    let started = tokio::time::Instant::now();
    let result = h.sync.sync_pending_operations().await.unwrap();
    let elapsed = started.elapsed();

    // Three batches, two pauses
    assert_eq!(result.total_operations, 5);
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_pass_does_not_repull_retrying_operations() {
    let transport = ScriptedTransport::new();
    transport.script("/mf1/flaky", [Reply::Status(429)]);
    let h = Harness::with(true, queue_settings(100, 1), transport).await;

    h.add(2, "/mf1/flaky").await;
    h.add(1, "/mf1/ok").await;

    let result = h.sync.sync_pending_operations().await.unwrap();

    assert_eq!(result.total_operations, 2);
    assert_eq!(h.transport.calls_to("/mf1/flaky"), 1);
    assert_eq!(h.transport.calls_to("/mf1/ok"), 1);
    assert!(!h.queue.is_currently_processing());
}

#[tokio::test(start_paused = true)]
async fn test_operation_headers_are_replayed() {
    let h = Harness::new(true).await;
    h.queue
        .add_operation(request(1, "/mf1/receipts").with_header("Idempotency-Key", "k-1"))
        .await
        .unwrap();

    h.sync.sync_pending_operations().await.unwrap();

    let calls = h.transport.calls();
    assert_eq!(calls[0].headers.get("Idempotency-Key").map(String::as_str), Some("k-1"));
    assert_eq!(calls[0].body, Some(serde_json::json!({ "amount": "10.00" })));
}
