//! # Offline Error Types
//!
//! Error types surfaced by the queue, the sync manager and the facade.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Offline Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Queue       │  │   Sync guards (misuse)  │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  QueueFull      │  │  Offline                │ │
//! │  │  InvalidUrl     │  │  Invalid-       │  │  SyncInProgress         │ │
//! │  │  ConfigLoad/Save│  │   Transition    │  │                         │ │
//! │  └─────────────────┘  │  Validation     │  └─────────────────────────┘ │
//! │                       └─────────────────┘                              │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Persistence   │  │   Transport     │  │      Lifecycle          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Storage        │  │  Network        │  │  ShuttingDown           │ │
//! │  │  Snapshot       │  │  Http{status}   │  │  Internal               │ │
//! │  │  (events only)  │  │  InvalidResponse│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persistence errors are never returned from mutating queue calls; they are
//! reported through [`OfflineEvent::Error`](crate::events::OfflineEvent::Error).

use thiserror::Error;

use ereceipt_core::{CoreError, OperationStatus, ValidationError};
use ereceipt_store::StoreError;

use crate::transport::TransportError;

/// Result type alias for offline engine operations.
pub type OfflineResult<T> = Result<T, OfflineError>;

/// Offline engine error type.
#[derive(Debug, Error)]
pub enum OfflineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid offline configuration.
    #[error("Invalid offline configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API or probe URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Queue at capacity with nothing of strictly lower priority to evict.
    #[error("Queue is full ({max_size} operations), cannot enqueue priority {priority}")]
    QueueFull { max_size: usize, priority: i32 },

    /// Status change outside the legal transition table.
    #[error("Operation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// Operation has no retry budget left.
    #[error("Operation {id} exhausted its retry budget ({retry_count}/{max_retries})")]
    RetryBudgetExhausted {
        id: String,
        retry_count: u32,
        max_retries: u32,
    },

    /// Request rejected before it reached the queue.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Sync Guard Errors
    // =========================================================================
    /// A drain pass was requested while offline.
    #[error("Cannot sync while offline")]
    Offline,

    /// A drain pass was requested while another one is running.
    #[error("A sync pass is already in progress")]
    SyncInProgress,

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted snapshot could not be read.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Request replay failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The engine has been destroyed.
    #[error("Offline engine is shutting down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for OfflineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::QueueFull { max_size, priority } => {
                OfflineError::QueueFull { max_size, priority }
            }
            CoreError::InvalidTransition { id, from, to } => {
                OfflineError::InvalidTransition { id, from, to }
            }
            CoreError::RetryBudgetExhausted {
                id,
                retry_count,
                max_retries,
            } => OfflineError::RetryBudgetExhausted {
                id,
                retry_count,
                max_retries,
            },
            CoreError::Validation(e) => OfflineError::Validation(e),
            other @ (CoreError::UnsupportedSnapshotVersion { .. }
            | CoreError::CorruptSnapshot(_)) => OfflineError::Snapshot(other.to_string()),
        }
    }
}

impl From<StoreError> for OfflineError {
    fn from(err: StoreError) -> Self {
        OfflineError::Storage(err.to_string())
    }
}

impl From<url::ParseError> for OfflineError {
    fn from(err: url::ParseError) -> Self {
        OfflineError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for OfflineError {
    fn from(err: std::io::Error) -> Self {
        OfflineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for OfflineError {
    fn from(err: toml::de::Error) -> Self {
        OfflineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for OfflineError {
    fn from(err: toml::ser::Error) -> Self {
        OfflineError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl OfflineError {
    /// Returns true if the same call may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            OfflineError::Transport(e) => e.is_retryable(),
            OfflineError::Storage(_) | OfflineError::SyncInProgress | OfflineError::Offline => true,
            _ => false,
        }
    }

    /// Returns true for guard violations the caller should have checked for.
    pub fn is_misuse(&self) -> bool {
        matches!(self, OfflineError::Offline | OfflineError::SyncInProgress)
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            OfflineError::InvalidConfig(_)
                | OfflineError::InvalidUrl(_)
                | OfflineError::ConfigLoadFailed(_)
                | OfflineError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_keep_their_shape() {
        let err: OfflineError = CoreError::QueueFull {
            max_size: 100,
            priority: 1,
        }
        .into();
        assert!(matches!(
            err,
            OfflineError::QueueFull {
                max_size: 100,
                priority: 1
            }
        ));

        let err: OfflineError = CoreError::CorruptSnapshot("eof".into()).into();
        assert!(matches!(err, OfflineError::Snapshot(_)));
    }

    #[test]
    fn test_categories() {
        assert!(OfflineError::Offline.is_misuse());
        assert!(OfflineError::SyncInProgress.is_misuse());
        assert!(!OfflineError::ShuttingDown.is_misuse());

        assert!(OfflineError::InvalidConfig("batch_size".into()).is_config_error());
        assert!(!OfflineError::Offline.is_config_error());

        let http_503: OfflineError = TransportError::Http {
            status: 503,
            message: "unavailable".into(),
        }
        .into();
        assert!(http_503.is_retryable());

        let http_400: OfflineError = TransportError::Http {
            status: 400,
            message: "bad request".into(),
        }
        .into();
        assert!(!http_400.is_retryable());
    }
}
