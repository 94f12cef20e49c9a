//! # ereceipt-store: Storage Layer for the eReceipt SDK
//!
//! This crate provides the Storage port the offline queue persists through,
//! plus its adapters: a process-local map and a SQLite key/value table.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Queue Data Flow                          │
//! │                                                                         │
//! │  OperationQueue::add_operation(..)                                     │
//! │       │  QueueSnapshot::encode(ops)                                    │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  ereceipt-store (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ Storage port  │    │  Repository   │    │  Migrations  │  │   │
//! │  │   │ (storage.rs)  │    │   (kv.rs)     │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ MemoryStorage │    │ KeyValueRepo  │    │ 001_kv.sql   │  │   │
//! │  │   │ Database      │───►│ upsert/get    │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/ereceipt/offline.db                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`storage`] - The Storage port and the in-memory adapter
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Storage error types
//! - [`repository`] - Key/value repository
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ereceipt_store::{Database, DbConfig, Storage};
//!
//! let db = Database::new(DbConfig::new("path/to/offline.db")).await?;
//! db.set("ereceipt_offline_queue", "{\"version\":1,\"operations\":[]}").await?;
//! let raw = db.get("ereceipt_offline_queue").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod storage;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use pool::{Database, DbConfig};
pub use repository::kv::KeyValueRepository;
pub use storage::{MemoryStorage, Storage};
