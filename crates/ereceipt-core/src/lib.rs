//! # ereceipt-core: Pure Domain Logic for the Offline Engine
//!
//! This crate is the **heart** of the offline operation queue. It contains the
//! domain types and every queue rule as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      eReceipt SDK Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Callers (React bindings, CLI, services)            │   │
//! │  │     queue receipt ──► queue cashier ──► trigger sync           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ereceipt-offline (queue, sync, manager)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ ereceipt-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   rules   │  │ snapshot  │  │ validation│  │   │
//! │  │   │ Queued    │  │ ordering  │  │ versioned │  │  request  │  │   │
//! │  │   │ Operation │  │ eviction  │  │ envelope  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO STORAGE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (QueuedOperation, statuses, sync results)
//! - [`rules`] - Priority ordering, batch selection, eviction, maintenance
//! - [`snapshot`] - Versioned persisted layout of the queue
//! - [`clock`] - Millisecond clock abstraction
//! - [`error`] - Domain error types
//! - [`validation`] - Request validation
//!
//! ## Example Usage
//!
//! ```rust
//! use ereceipt_core::rules;
//! use ereceipt_core::types::{HttpMethod, OperationRequest, OperationType, QueuedOperation, ResourceType};
//!
//! let request = OperationRequest::new(
//!     OperationType::Create,
//!     ResourceType::Receipt,
//!     "/mf1/receipts",
//!     HttpMethod::Post,
//! )
//! .with_priority(3);
//!
//! let op = QueuedOperation::from_request("op-1".into(), request, 1_000, 3);
//! let batch = rules::next_batch(&[op], 10, &Default::default());
//! assert_eq!(batch.len(), 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod rules;
pub mod snapshot;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use ereceipt_core::QueuedOperation` instead of
// `use ereceipt_core::types::QueuedOperation`

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ValidationError};
pub use snapshot::QueueSnapshot;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Storage key under which the whole queue is persisted as one snapshot.
pub const QUEUE_STORAGE_KEY: &str = "ereceipt_offline_queue";

/// Current version of the persisted snapshot envelope.
///
/// Version 0 is the legacy bare JSON array of operations.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Priority given to operations enqueued without an explicit one.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Default retry budget per operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default upper bound on the number of queued operations.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Default number of operations pulled per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Hard ceiling for a configured retry budget.
pub const MAX_RETRY_BUDGET: u32 = 100;
