//! # Domain Types
//!
//! Core domain types used throughout the offline engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ QueuedOperation │   │ OperationStatus │   │  SyncResult     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  Pending        │   │  operation_id   │       │
//! │  │  type/resource  │   │  Processing     │   │  outcome        │       │
//! │  │  endpoint/method│   │  Completed      │   │  error          │       │
//! │  │  priority       │   │  Failed         │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ OperationType   │   │   HttpMethod    │   │ BatchSyncResult │       │
//! │  │  CREATE         │   │  GET POST PUT   │   │  totals         │       │
//! │  │  UPDATE DELETE  │   │  PATCH DELETE   │   │  results[]      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status Lifecycle
//! ```text
//!   pending ──► processing ──► completed
//!      ▲            │
//!      └── retry ───┤
//!                   ▼
//!                 failed ──(retry_failed, budget left)──► pending
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ts_rs::TS;

use crate::{DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};

// =============================================================================
// Operation Type
// =============================================================================

/// Semantic intent of a queued operation, independent of the HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "CREATE"),
            OperationType::Update => write!(f, "UPDATE"),
            OperationType::Delete => write!(f, "DELETE"),
        }
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be pulled by a drain pass.
    #[default]
    Pending,
    /// Request in flight.
    Processing,
    /// Remote service accepted the request.
    Completed,
    /// Terminal failure or retry budget exhausted.
    Failed,
}

impl OperationStatus {
    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// ## Legal Transitions
    /// - `pending → processing`
    /// - `processing → completed | pending | failed`
    /// - `failed → pending` (explicit retry of a failed operation)
    /// - any status to itself (field-only updates)
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;

        self == next
            || matches!(
                (self, next),
                (Pending, Processing)
                    | (Processing, Completed)
                    | (Processing, Pending)
                    | (Processing, Failed)
                    | (Failed, Pending)
            )
    }

    /// Returns true for statuses that a drain pass never touches again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::Processing => write!(f, "processing"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// HTTP Method
// =============================================================================

/// HTTP method replayed verbatim when the operation is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

// =============================================================================
// Resource Type
// =============================================================================

/// Domain resource an operation targets.
///
/// Used for statistics and filtering only, never for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Receipt,
    Cashier,
    Merchant,
    PointOfSale,
    CashRegister,
    Supplier,
    DailyReport,
    Journal,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Receipt => "receipt",
            ResourceType::Cashier => "cashier",
            ResourceType::Merchant => "merchant",
            ResourceType::PointOfSale => "point_of_sale",
            ResourceType::CashRegister => "cash_register",
            ResourceType::Supplier => "supplier",
            ResourceType::DailyReport => "daily_report",
            ResourceType::Journal => "journal",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Operation Request
// =============================================================================

/// Everything a caller supplies when enqueueing an operation.
///
/// ## Example
/// ```rust
/// use ereceipt_core::types::*;
///
/// let request = OperationRequest::new(
///     OperationType::Update,
///     ResourceType::Cashier,
///     "/mf1/cashiers/42",
///     HttpMethod::Put,
/// )
/// .with_data(serde_json::json!({ "email": "new@shop.it" }))
/// .with_priority(2);
///
/// assert_eq!(request.priority, 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub operation_type: OperationType,
    pub resource: ResourceType,
    pub endpoint: String,
    pub method: HttpMethod,
    pub data: Option<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub priority: i32,
    /// Overrides the queue's default retry budget when set.
    pub max_retries: Option<u32>,
}

impl OperationRequest {
    /// Creates a request with default priority and no body.
    pub fn new(
        operation_type: OperationType,
        resource: ResourceType,
        endpoint: impl Into<String>,
        method: HttpMethod,
    ) -> Self {
        OperationRequest {
            operation_type,
            resource,
            endpoint: endpoint.into(),
            method,
            data: None,
            headers: BTreeMap::new(),
            priority: DEFAULT_PRIORITY,
            max_retries: None,
        }
    }

    /// Sets the request body.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the priority (higher = more urgent).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a header replayed with the request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Overrides the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

// =============================================================================
// Queued Operation
// =============================================================================

/// A single deferred mutating request. The only persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique identifier, assigned at creation, immutable.
    pub id: String,

    #[serde(rename = "type")]
    pub operation_type: OperationType,

    pub resource: ResourceType,

    /// Endpoint to replay, relative to the API base URL or absolute.
    pub endpoint: String,

    pub method: HttpMethod,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    pub status: OperationStatus,

    /// Epoch milliseconds.
    #[ts(type = "number")]
    pub created_at: i64,

    /// Epoch milliseconds, stamped on every update.
    #[ts(type = "number")]
    pub updated_at: i64,

    pub retry_count: u32,

    pub max_retries: u32,

    /// Higher = more urgent. Fixed at creation.
    pub priority: i32,

    /// Last failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

impl QueuedOperation {
    /// Builds a fresh pending operation from a caller request.
    pub fn from_request(
        id: String,
        request: OperationRequest,
        now_millis: i64,
        default_max_retries: u32,
    ) -> Self {
        QueuedOperation {
            id,
            operation_type: request.operation_type,
            resource: request.resource,
            endpoint: request.endpoint,
            method: request.method,
            data: request.data,
            headers: request.headers,
            status: OperationStatus::Pending,
            created_at: now_millis,
            updated_at: now_millis,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            priority: request.priority,
            error: None,
        }
    }

    /// Returns true if another attempt is allowed after a retryable failure.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Generates a new operation id.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Creates a pending operation stamped with the current wall clock.
    ///
    /// Mostly useful in tests and examples; the queue uses its own clock.
    pub fn new_now(request: OperationRequest) -> Self {
        Self::from_request(
            Self::generate_id(),
            request,
            Utc::now().timestamp_millis(),
            DEFAULT_MAX_RETRIES,
        )
    }
}

// =============================================================================
// Operation Update (partial merge)
// =============================================================================

/// Partial update merged into an existing operation.
///
/// `error` is doubly optional: `None` leaves the field alone,
/// `Some(None)` clears it, `Some(Some(msg))` sets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationUpdate {
    pub status: Option<OperationStatus>,
    pub retry_count: Option<u32>,
    pub error: Option<Option<String>>,
}

impl OperationUpdate {
    /// Update that only changes the status.
    pub fn status(status: OperationStatus) -> Self {
        OperationUpdate {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Sets the retry counter.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Records an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    /// Clears any recorded error.
    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    /// Merges this update into `op` and stamps `updated_at`.
    pub fn apply(&self, op: &mut QueuedOperation, now_millis: i64) {
        if let Some(status) = self.status {
            op.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            op.retry_count = retry_count;
        }
        if let Some(ref error) = self.error {
            op.error = error.clone();
        }
        op.updated_at = now_millis;
    }
}

// =============================================================================
// Queue Statistics
// =============================================================================

/// Per-status counts over the whole queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

// =============================================================================
// Sync Results (transient, never persisted)
// =============================================================================

/// How a single operation ended within a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Request accepted, operation completed.
    Succeeded,
    /// Retryable failure, operation back to pending with a retry scheduled.
    Retrying,
    /// Terminal failure or budget exhausted, operation failed.
    Failed,
}

/// Outcome of one operation within a drain pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub operation_id: String,
    pub outcome: SyncOutcome,
    #[ts(optional)]
    pub error: Option<String>,
    /// HTTP status reported by the transport, when there was one.
    #[ts(optional)]
    pub status_code: Option<u16>,
    #[ts(optional)]
    pub response: Option<serde_json::Value>,
}

impl SyncResult {
    /// Successful outcome carrying the response body.
    pub fn succeeded(operation_id: impl Into<String>, response: serde_json::Value) -> Self {
        SyncResult {
            operation_id: operation_id.into(),
            outcome: SyncOutcome::Succeeded,
            error: None,
            status_code: None,
            response: Some(response),
        }
    }

    /// Failed outcome, either retrying or terminal.
    pub fn failed(
        operation_id: impl Into<String>,
        error: impl Into<String>,
        status_code: Option<u16>,
        retrying: bool,
    ) -> Self {
        SyncResult {
            operation_id: operation_id.into(),
            outcome: if retrying {
                SyncOutcome::Retrying
            } else {
                SyncOutcome::Failed
            },
            error: Some(error.into()),
            status_code,
            response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Succeeded
    }
}

/// Aggregate of every SyncResult produced by one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncResult {
    pub total_operations: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<SyncResult>,
}

impl BatchSyncResult {
    /// Result of a pass that had nothing to do.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Aggregates per-operation results.
    pub fn from_results(results: Vec<SyncResult>) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        BatchSyncResult {
            total_operations: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_operations == 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> OperationRequest {
        OperationRequest::new(
            OperationType::Create,
            ResourceType::Receipt,
            "/mf1/receipts",
            HttpMethod::Post,
        )
    }

    #[test]
    fn test_status_transitions() {
        use OperationStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Pending));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_persisted_field_names() {
        let op = QueuedOperation::from_request("op-1".into(), sample_request(), 1_000, 3);
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["type"], "CREATE");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["resource"], "receipt");
        assert_eq!(json["createdAt"], 1_000);
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["maxRetries"], 3);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_request_overrides_retry_budget() {
        let op = QueuedOperation::from_request(
            "op-1".into(),
            sample_request().with_max_retries(7),
            0,
            3,
        );
        assert_eq!(op.max_retries, 7);
        assert_eq!(op.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_update_merges_and_stamps() {
        let mut op = QueuedOperation::from_request("op-1".into(), sample_request(), 1_000, 3);

        OperationUpdate::status(OperationStatus::Processing).apply(&mut op, 2_000);
        assert_eq!(op.status, OperationStatus::Processing);
        assert_eq!(op.updated_at, 2_000);

        OperationUpdate::status(OperationStatus::Pending)
            .with_retry_count(1)
            .with_error("HTTP 503")
            .apply(&mut op, 3_000);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.error.as_deref(), Some("HTTP 503"));

        OperationUpdate::default().clear_error().apply(&mut op, 4_000);
        assert!(op.error.is_none());
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.created_at, 1_000);
    }

    #[test]
    fn test_batch_result_counts() {
        let result = BatchSyncResult::from_results(vec![
            SyncResult::succeeded("a", serde_json::Value::Null),
            SyncResult::failed("b", "HTTP 400", Some(400), false),
            SyncResult::failed("c", "HTTP 503", Some(503), true),
        ]);

        assert_eq!(result.total_operations, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert_eq!(result.results[2].outcome, SyncOutcome::Retrying);
        assert!(BatchSyncResult::empty().is_empty());
    }
}
