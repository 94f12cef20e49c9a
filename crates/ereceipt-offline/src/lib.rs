//! # ereceipt-offline: Offline Queue & Sync Engine
//!
//! Lets a point-of-sale client keep issuing mutating requests (receipts,
//! cashiers, merchant changes) while the fiscal API is unreachable, and
//! replays them once connectivity returns.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Engine Architecture                      │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    OfflineManager (facade)                       │  │
//! │  │  convenience enqueue • aggregated state (watch) • destroy        │  │
//! │  └───────────────┬──────────────────────────────┬───────────────────┘  │
//! │                  │                              │                       │
//! │                  ▼                              ▼                       │
//! │  ┌────────────────────────────┐  ┌────────────────────────────────┐    │
//! │  │      OperationQueue        │◄─┤          SyncManager           │    │
//! │  │                            │  │                                │    │
//! │  │ priority order, bounded,   │  │ drain passes, concurrent       │    │
//! │  │ eviction, processing flag  │  │ batches, backoff retries,      │    │
//! │  │ snapshot on every mutation │  │ offline→online edge trigger    │    │
//! │  └─────────────┬──────────────┘  └───────┬───────────────┬────────┘    │
//! │                │                         │               │             │
//! │                ▼                         ▼               ▼             │
//! │  ┌────────────────────────┐  ┌──────────────────┐ ┌──────────────────┐ │
//! │  │ Storage (ereceipt-store│  │    Transport     │ │ ConnectivityMon. │ │
//! │  │ SQLite / memory)       │  │ reqwest adapter  │ │ watch<bool>      │ │
//! │  └────────────────────────┘  └──────────────────┘ └──────────────────┘ │
//! │                                                                         │
//! │  EVENTS (broadcast): operation_added, operation_completed,             │
//! │  operation_failed, retry_scheduled, batch_sync_completed,              │
//! │  queue_empty, connectivity_changed, error, ...                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Engine configuration (queue, sync, api, connectivity, storage)
//! - [`error`] - Offline error types
//! - [`events`] - Event enum and broadcast bus
//! - [`queue`] - Durable priority queue
//! - [`retry`] - Exponential backoff policy
//! - [`transport`] - Transport port and HTTP adapter
//! - [`connectivity`] - Connectivity signal, edge detection, reachability probe
//! - [`sync`] - Drain passes and the scheduling driver
//! - [`manager`] - Facade owning queue and sync manager
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ereceipt_offline::{ConnectivityMonitor, HttpTransport, OfflineConfig, OfflineManager};
//! use ereceipt_store::{Database, DbConfig};
//!
//! let config = OfflineConfig::load_or_default(None);
//! let db = Database::new(DbConfig::in_memory()).await?;
//! let monitor = ConnectivityMonitor::new(false);
//!
//! let manager = OfflineManager::new(
//!     &config,
//!     Arc::new(db),
//!     Arc::new(HttpTransport::new(&config.api)?),
//!     &monitor,
//! )
//! .await?;
//!
//! manager.queue_receipt_creation(receipt_json).await?;
//! monitor.set_online(true); // offline → online edge drains the queue
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod sync;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    ApiSettings, ConnectivitySettings, OfflineConfig, QueueSettings, StorageSettings,
    SyncSettings,
};
pub use connectivity::{ConnectivityEdge, ConnectivityMonitor, ConnectivityProbe, EdgeDetector, ProbeHandle};
pub use error::{OfflineError, OfflineResult};
pub use events::{ClearScope, EventBus, OfflineEvent};
pub use manager::{OfflineManager, OfflineState};
pub use queue::{OperationQueue, ProcessingGuard};
pub use retry::RetryPolicy;
pub use sync::{SyncManager, SyncStatus};
pub use transport::{
    HttpTransport, RequestConfig, Transport, TransportError, TransportResponse, TransportResult,
};
