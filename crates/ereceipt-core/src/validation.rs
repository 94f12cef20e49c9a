//! # Validation Module
//!
//! Input validation for operations entering the queue.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Schema validation (caller side)                              │
//! │  ├── Receipt / cashier payload shape                                   │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Endpoint is replayable                                            │
//! │  └── Retry budget and queue sizing are sane                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote service                                               │
//! │  └── 4xx → terminal failure, recorded on the operation                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use ereceipt_core::validation::{validate_endpoint, validate_max_retries};
//!
//! validate_endpoint("/mf1/receipts").unwrap();
//! validate_max_retries(3).unwrap();
//! ```

use crate::error::ValidationError;
use crate::types::OperationRequest;
use crate::MAX_RETRY_BUDGET;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum endpoint length accepted.
const MAX_ENDPOINT_LEN: usize = 2048;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates an endpoint.
///
/// ## Rules
/// - Must not be empty
/// - At most 2048 characters
/// - Relative (`/path`) or absolute `http(s)://` URL
pub fn validate_endpoint(endpoint: &str) -> ValidationResult<()> {
    let endpoint = endpoint.trim();

    if endpoint.is_empty() {
        return Err(ValidationError::Required {
            field: "endpoint".to_string(),
        });
    }

    if endpoint.len() > MAX_ENDPOINT_LEN {
        return Err(ValidationError::TooLong {
            field: "endpoint".to_string(),
            max: MAX_ENDPOINT_LEN,
        });
    }

    let is_relative = endpoint.starts_with('/');
    let is_absolute = endpoint.starts_with("http://") || endpoint.starts_with("https://");
    if !is_relative && !is_absolute {
        return Err(ValidationError::InvalidFormat {
            field: "endpoint".to_string(),
            reason: "must start with '/' or http(s)://".to_string(),
        });
    }

    if endpoint.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "endpoint".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates one stored request header.
///
/// ## Rules
/// - Name is a non-empty HTTP token: letters, digits and ``!#$%&'*+-.^_`|~``
/// - Value is visible ASCII, space or tab
pub fn validate_header(name: &str, value: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::InvalidFormat {
            field: "headers".to_string(),
            reason: "empty header name".to_string(),
        });
    }

    if !name.bytes().all(is_token_byte) {
        return Err(ValidationError::InvalidFormat {
            field: "headers".to_string(),
            reason: format!("header name '{}' is not a valid token", name.escape_debug()),
        });
    }

    if !value.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b)) {
        return Err(ValidationError::InvalidFormat {
            field: "headers".to_string(),
            reason: format!("header '{}' has a value with control or non-ASCII characters", name),
        });
    }

    Ok(())
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Validates a per-operation retry budget.
pub fn validate_max_retries(max_retries: u32) -> ValidationResult<()> {
    if max_retries > MAX_RETRY_BUDGET {
        return Err(ValidationError::OutOfRange {
            field: "max_retries".to_string(),
            min: 0,
            max: i64::from(MAX_RETRY_BUDGET),
        });
    }
    Ok(())
}

/// Validates queue sizing.
pub fn validate_queue_limits(max_queue_size: usize, batch_size: usize) -> ValidationResult<()> {
    if max_queue_size == 0 {
        return Err(ValidationError::OutOfRange {
            field: "max_queue_size".to_string(),
            min: 1,
            max: i64::MAX,
        });
    }
    if batch_size == 0 {
        return Err(ValidationError::OutOfRange {
            field: "batch_size".to_string(),
            min: 1,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates a whole request before it is enqueued.
pub fn validate_request(request: &OperationRequest) -> ValidationResult<()> {
    validate_endpoint(&request.endpoint)?;

    if let Some(max_retries) = request.max_retries {
        validate_max_retries(max_retries)?;
    }

    for (name, value) in &request.headers {
        validate_header(name, value)?;
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HttpMethod, OperationType, ResourceType};

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("/mf1/receipts").is_ok());
        assert!(validate_endpoint("https://api.example.it/mf1/receipts").is_ok());

        assert!(validate_endpoint("").is_err());
        assert!(validate_endpoint("   ").is_err());
        assert!(validate_endpoint("mf1/receipts").is_err());
        assert!(validate_endpoint("/mf1/rec eipts").is_err());
        assert!(validate_endpoint(&format!("/{}", "a".repeat(3000))).is_err());
    }

    #[test]
    fn test_validate_header() {
        assert!(validate_header("X-Request-Id", "abc-123").is_ok());
        assert!(validate_header("Authorization", "Bearer a.b.c").is_ok());
        assert!(validate_header("X-Note", "tab\tis fine").is_ok());
        assert!(validate_header("X-Empty", "").is_ok());

        assert!(validate_header("", "x").is_err());
        assert!(validate_header("Bad Header", "x").is_err());
        assert!(validate_header("X-Colon:", "x").is_err());
        assert!(validate_header("X-Note", "line1\nline2").is_err());
        assert!(validate_header("X-Note", "bell\u{7}").is_err());
        assert!(validate_header("X-Note", "caffè").is_err());
    }

    #[test]
    fn test_validate_max_retries() {
        assert!(validate_max_retries(0).is_ok());
        assert!(validate_max_retries(100).is_ok());
        assert!(validate_max_retries(101).is_err());
    }

    #[test]
    fn test_validate_queue_limits() {
        assert!(validate_queue_limits(100, 10).is_ok());
        assert!(validate_queue_limits(0, 10).is_err());
        assert!(validate_queue_limits(100, 0).is_err());
    }

    #[test]
    fn test_validate_request() {
        let request = OperationRequest::new(
            OperationType::Delete,
            ResourceType::Cashier,
            "/mf1/cashiers/7",
            HttpMethod::Delete,
        );
        assert!(validate_request(&request).is_ok());
        assert!(validate_request(&request.clone().with_max_retries(500)).is_err());
        assert!(validate_request(&request.clone().with_header(" ", "x")).is_err());
        assert!(validate_request(&request.with_header("X-Note", "line1\nline2")).is_err());
    }
}
