//! # Queue Snapshot
//!
//! Persisted layout of the whole queue, stored as one JSON document under
//! [`QUEUE_STORAGE_KEY`](crate::QUEUE_STORAGE_KEY).
//!
//! ## Layout
//! ```text
//! Version 1 (current)                  Version 0 (legacy, read-only)
//! ───────────────────                  ─────────────────────────────
//! {                                    [
//!   "version": 1,                        { "id": "...", ... },
//!   "operations": [                      ...
//!     { "id": "...", ... }             ]
//!   ]
//! }
//! ```
//!
//! Legacy arrays are migrated on read; the next write upgrades them.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::QueuedOperation;
use crate::SNAPSHOT_VERSION;

/// Decoded queue snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    pub operations: Vec<QueuedOperation>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    operations: &'a [QueuedOperation],
}

impl QueueSnapshot {
    /// Wraps operations in a current-version snapshot.
    pub fn new(operations: Vec<QueuedOperation>) -> Self {
        QueueSnapshot {
            version: SNAPSHOT_VERSION,
            operations,
        }
    }

    /// Serializes operations without cloning them.
    pub fn encode(operations: &[QueuedOperation]) -> CoreResult<String> {
        serde_json::to_string(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            operations,
        })
        .map_err(|e| CoreError::CorruptSnapshot(e.to_string()))
    }

    /// Parses a stored snapshot, migrating legacy layouts.
    pub fn decode(raw: &str) -> CoreResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| CoreError::CorruptSnapshot(e.to_string()))?;

        match value {
            serde_json::Value::Array(_) => {
                let operations: Vec<QueuedOperation> = serde_json::from_value(value)
                    .map_err(|e| CoreError::CorruptSnapshot(e.to_string()))?;
                Ok(QueueSnapshot::new(operations))
            }
            serde_json::Value::Object(ref fields) => {
                let found = fields
                    .get("version")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| CoreError::CorruptSnapshot("missing version".into()))?;

                if found > u64::from(SNAPSHOT_VERSION) {
                    return Err(CoreError::UnsupportedSnapshotVersion {
                        found,
                        supported: SNAPSHOT_VERSION,
                    });
                }

                let mut snapshot: QueueSnapshot = serde_json::from_value(value)
                    .map_err(|e| CoreError::CorruptSnapshot(e.to_string()))?;
                snapshot.version = SNAPSHOT_VERSION;
                Ok(snapshot)
            }
            other => Err(CoreError::CorruptSnapshot(format!(
                "expected object or array, got {}",
                other
            ))),
        }
    }
}
