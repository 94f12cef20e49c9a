//! # Offline Agent
//!
//! Headless process hosting the offline engine next to a point-of-sale
//! client.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Agent                                    │
//! │                                                                         │
//! │  startup:   config ──► SQLite ──► HttpTransport ──► probe ──► manager  │
//! │                                                        │                │
//! │  running:   probe pushes online/offline ──► edge ──► drain pass        │
//! │             events + state changes ──► tracing                          │
//! │                                                                         │
//! │  shutdown:  Ctrl+C / SIGTERM ──► destroy ──► probe stop ──► db close   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ereceipt_offline::{
    ConnectivityMonitor, ConnectivityProbe, HttpTransport, OfflineConfig, OfflineEvent,
    OfflineManager,
};
use ereceipt_store::{Database, DbConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting offline agent");

    let config = OfflineConfig::load_or_default(None);
    info!(
        base_url = %config.api.base_url,
        probe_url = %config.probe_url(),
        max_queue_size = config.queue.max_queue_size,
        "Configuration loaded"
    );

    let db_config = match config.database_path() {
        Some(path) => DbConfig::new(path),
        None => {
            warn!("No data directory available, queue will not survive restarts");
            DbConfig::in_memory()
        }
    };
    let db = Arc::new(
        Database::new(db_config)
            .await
            .context("failed to open queue database")?,
    );

    let transport = Arc::new(HttpTransport::new(&config.api).context("invalid API settings")?);

    let monitor = ConnectivityMonitor::new(false);
    let probe = ConnectivityProbe::new(&config, monitor.clone())
        .context("invalid connectivity settings")?
        .spawn();

    let manager = OfflineManager::new(&config, db.clone(), transport, &monitor)
        .await
        .context("failed to start offline engine")?;

    let stats = manager.get_stats().await;
    info!(
        pending = stats.pending,
        failed = stats.failed,
        total = stats.total,
        "Offline engine ready"
    );

    let event_log = tokio::spawn(log_events(manager.subscribe()));
    let state_log = tokio::spawn(log_state(manager.subscribe_state()));

    shutdown_signal().await;

    manager.destroy();
    probe.shutdown().await;
    event_log.abort();
    state_log.abort();

    let remaining = manager.get_stats().await;
    info!(
        pending = remaining.pending,
        failed = remaining.failed,
        "Queue persisted for next start"
    );

    drop(manager);
    db.close().await;

    info!("Offline agent stopped");
    Ok(())
}

/// Installs the fmt subscriber, honouring `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ereceipt=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<OfflineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                match &event {
                    OfflineEvent::BatchSyncCompleted { result } => info!(
                        total = result.total_operations,
                        succeeded = result.success_count,
                        failed = result.failure_count,
                        "Batch sync completed"
                    ),
                    OfflineEvent::QueueEmpty => info!("Queue drained"),
                    OfflineEvent::Error { context, message } => {
                        error!(context = %context, message = %message, "Offline engine error")
                    }
                    _ => {}
                }
                match serde_json::to_string(&event) {
                    Ok(json) => debug!(kind = event.kind(), payload = %json, "Event"),
                    Err(e) => debug!(kind = event.kind(), error = %e, "Event"),
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn log_state(mut state: tokio::sync::watch::Receiver<ereceipt_offline::OfflineState>) {
    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().clone();
        debug!(
            online = current.sync_status.is_online,
            processing = current.sync_status.is_processing,
            pending = current.stats.pending,
            completed = current.stats.completed,
            failed = current.stats.failed,
            "Offline state changed"
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
