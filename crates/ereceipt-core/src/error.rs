//! # Error Types
//!
//! Domain-specific error types for ereceipt-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ereceipt-core errors (this file)                                      │
//! │  ├── CoreError        - Queue rule violations, snapshot problems       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  ereceipt-store errors (separate crate)                                │
//! │  └── StoreError       - Storage read/write failures                    │
//! │                                                                         │
//! │  ereceipt-offline errors (separate crate)                              │
//! │  ├── OfflineError     - What callers of the engine see                 │
//! │  └── TransportError   - Per-request replay failures                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → OfflineError → caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::OperationStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core queue rule errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The queue is at capacity and nothing has a strictly lower priority.
    ///
    /// ## When This Occurs
    /// ```text
    /// max_queue_size = 3, queue = [p2, p2, p1]
    ///      │
    ///      ▼
    /// enqueue(priority = 1)  → nothing strictly lower than 1
    ///      │
    ///      ▼
    /// QueueFull { max_size: 3, priority: 1 }
    /// ```
    #[error("Queue is full ({max_size} operations) and holds nothing with priority lower than {priority}")]
    QueueFull { max_size: usize, priority: i32 },

    /// A status change outside the legal transition table.
    #[error("Operation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// Attempt to put an operation back to pending with no budget left.
    #[error("Operation {id} exhausted its retry budget ({retry_count}/{max_retries})")]
    RetryBudgetExhausted {
        id: String,
        retry_count: u32,
        max_retries: u32,
    },

    /// Persisted snapshot written by a newer version.
    #[error("Unsupported queue snapshot version {found} (supported up to {supported})")]
    UnsupportedSnapshotVersion { found: u64, supported: u32 },

    /// Persisted snapshot that cannot be decoded.
    #[error("Corrupt queue snapshot: {0}")]
    CorruptSnapshot(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., endpoint without a leading slash).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
