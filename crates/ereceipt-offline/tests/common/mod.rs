//! Shared fixtures for the offline engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use ereceipt_core::{HttpMethod, ManualClock, OperationRequest, OperationType, ResourceType};
use ereceipt_offline::{
    ConnectivityMonitor, EventBus, OfflineEvent, OperationQueue, QueueSettings, RequestConfig,
    SyncManager, SyncSettings, Transport, TransportError, TransportResponse, TransportResult,
};
use ereceipt_store::MemoryStorage;

// =============================================================================
// Scripted Transport
// =============================================================================

/// What the fake service answers for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Status(u16),
    Network,
}

/// One recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

/// In-process transport answering from per-endpoint scripts.
///
/// Endpoints without a script (or whose script ran out) answer 200 with
/// `{"ok": true}`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        ScriptedTransport {
            latency: Some(latency),
            ..Default::default()
        }
    }

    /// Queues replies for an endpoint, consumed in order.
    pub fn script(&self, endpoint: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn handle(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        self.calls.lock().unwrap().push(Call {
            method,
            endpoint: url.to_string(),
            body: body.cloned(),
            headers: config.headers.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Reply::Ok(json!({ "ok": true })));

        match reply {
            Reply::Ok(data) => Ok(TransportResponse::ok(data)),
            Reply::Status(status) => Err(TransportError::Http {
                status,
                message: format!("scripted {}", status),
            }),
            Reply::Network => Err(TransportError::Network("connection refused".into())),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, body: Option<&Value>, config: &RequestConfig) -> TransportResult<TransportResponse> {
        self.handle(HttpMethod::Get, url, body, config).await
    }

    async fn post(&self, url: &str, body: Option<&Value>, config: &RequestConfig) -> TransportResult<TransportResponse> {
        self.handle(HttpMethod::Post, url, body, config).await
    }

    async fn put(&self, url: &str, body: Option<&Value>, config: &RequestConfig) -> TransportResult<TransportResponse> {
        self.handle(HttpMethod::Put, url, body, config).await
    }

    async fn patch(&self, url: &str, body: Option<&Value>, config: &RequestConfig) -> TransportResult<TransportResponse> {
        self.handle(HttpMethod::Patch, url, body, config).await
    }

    async fn delete(&self, url: &str, body: Option<&Value>, config: &RequestConfig) -> TransportResult<TransportResponse> {
        self.handle(HttpMethod::Delete, url, body, config).await
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Queue + sync manager wired to in-memory collaborators.
pub struct Harness {
    pub queue: Arc<OperationQueue>,
    pub sync: SyncManager,
    pub monitor: ConnectivityMonitor,
    pub transport: Arc<ScriptedTransport>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::with(online, QueueSettings::default(), ScriptedTransport::new()).await
    }

    pub async fn with(online: bool, settings: QueueSettings, transport: ScriptedTransport) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let events = EventBus::new(256);
        let queue = Arc::new(
            OperationQueue::load(settings, storage.clone(), clock.clone(), events.clone())
                .await
                .unwrap(),
        );
        let transport = Arc::new(transport);
        let monitor = ConnectivityMonitor::new(online);
        let sync = SyncManager::new(
            queue.clone(),
            transport.clone(),
            &SyncSettings::default(),
            monitor.subscribe(),
            events.clone(),
        );

        Harness {
            queue,
            sync,
            monitor,
            transport,
            storage,
            clock,
            events,
        }
    }

    /// Enqueues a request, stepping the clock so `created_at` is distinct.
    pub async fn add(&self, priority: i32, endpoint: &str) -> String {
        self.clock.advance(10);
        self.queue
            .add_operation(request(priority, endpoint))
            .await
            .unwrap()
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn request(priority: i32, endpoint: &str) -> OperationRequest {
    OperationRequest::new(
        OperationType::Create,
        ResourceType::Receipt,
        endpoint,
        HttpMethod::Post,
    )
    .with_data(json!({ "amount": "10.00" }))
    .with_priority(priority)
}

pub fn queue_settings(max_queue_size: usize, batch_size: usize) -> QueueSettings {
    QueueSettings {
        max_queue_size,
        batch_size,
        ..Default::default()
    }
}

/// Waits (in virtual time) for the first event matching `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<OfflineEvent>, mut pred: F) -> OfflineEvent
where
    F: FnMut(&OfflineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything already buffered on a receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<OfflineEvent>) -> Vec<OfflineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
