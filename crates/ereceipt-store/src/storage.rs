//! # Storage Port
//!
//! Minimal async key/value contract the offline queue persists through.
//!
//! ```text
//! ┌───────────────────────────┐
//! │     OperationQueue        │
//! │  persist(): encode + set  │
//! └─────────────┬─────────────┘
//!               │ Arc<dyn Storage>
//!     ┌─────────┴──────────┐
//!     ▼                    ▼
//! MemoryStorage         Database
//! (tests, ephemeral)    (SQLite key_value_store)
//! ```
//!
//! Implementations must be safe to share across tasks. Values are opaque
//! strings; the queue owns the encoding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::pool::Database;

// =============================================================================
// Port
// =============================================================================

/// Async key/value storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the value under `key`. Missing keys are `Ok(None)`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}

// =============================================================================
// In-Memory Adapter
// =============================================================================

/// Process-local storage.
///
/// Reads and writes can be made to fail on demand, which is how the queue's
/// persistence failure paths get exercised.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage pre-populated with one entry.
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.into(), value.into());
        MemoryStorage {
            entries: RwLock::new(entries),
            ..Self::default()
        }
    }

    /// Makes subsequent `get` calls fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `set`/`remove` calls fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self, key: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write_failed(key, "writes disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::read_failed(key, "reads disabled"));
        }
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_writable(key)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(key = %key, bytes = value.len(), "memory storage write");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check_writable(key)?;
        self.entries.write().await.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// SQLite Adapter
// =============================================================================

#[async_trait]
impl Storage for Database {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.kv().get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.kv().upsert(key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.kv().delete(key).await.map(|_| ())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;
    use std::sync::Arc;

    async fn exercise(storage: Arc<dyn Storage>) {
        assert_eq!(storage.get("k").await.unwrap(), None);
        storage.set("k", "v1").await.unwrap();
        storage.set("k", "v2").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v2"));
        storage.remove("k").await.unwrap();
        storage.remove("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_storage_contract() {
        exercise(Arc::new(MemoryStorage::new())).await;
    }

    #[tokio::test]
    async fn test_database_storage_contract() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        exercise(Arc::new(db)).await;
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let storage = MemoryStorage::with_entry("k", "old");
        storage.set_fail_writes(true);

        let err = storage.set("k", "new").await.unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed { .. }));
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("old"));
        assert_eq!(storage.write_count(), 0);

        storage.set_fail_writes(false);
        storage.set("k", "new").await.unwrap();
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_reads() {
        let storage = MemoryStorage::with_entry("k", "v");
        storage.set_fail_reads(true);

        let err = storage.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::ReadFailed { .. }));
        assert!(err.is_retryable());

        storage.set_fail_reads(false);
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
