//! # Transport Port
//!
//! The network collaborator every queued operation is replayed through, plus
//! the reqwest-backed HTTP adapter.
//!
//! ## Replay Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Request Replay                                  │
//! │                                                                         │
//! │  QueuedOperation { method: PUT, endpoint: "/mf1/cashiers/7", data }     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Transport::execute(method, endpoint, data, RequestConfig{headers})    │
//! │       │  method taken verbatim from the stored operation               │
//! │       ▼                                                                 │
//! │  HttpTransport                                                         │
//! │  ├── base_url.join("mf1/cashiers/7")                                   │
//! │  ├── default headers + operation headers                               │
//! │  └── JSON body                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2xx          → TransportResponse { status, data }                     │
//! │  connect/timeout → TransportError::Network        (retryable)          │
//! │  5xx, 429     → TransportError::Http              (retryable)          │
//! │  other 4xx    → TransportError::Http              (terminal)           │
//! │  bad JSON     → TransportError::InvalidResponse   (terminal)           │
//! │  bad URL/header → TransportError::InvalidRequest  (terminal)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use ereceipt_core::validation::validate_header;
use ereceipt_core::HttpMethod;

use crate::config::ApiSettings;
use crate::error::{OfflineError, OfflineResult};

/// Longest response body echoed into an error message.
const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// Transport Types
// =============================================================================

/// Replay failure for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response was received (connect, DNS, timeout, I/O).
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The service answered 2xx with a body that isn't JSON.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built (bad endpoint or header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Network failures, HTTP 5xx and HTTP 429 are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Http { status, .. } => *status >= 500 || *status == 429,
            TransportError::InvalidResponse(_) | TransportError::InvalidRequest(_) => false,
        }
    }

    /// HTTP status, when the service answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Decoded JSON body, `Null` when the body is empty.
    pub data: Value,
}

impl TransportResponse {
    pub fn ok(data: Value) -> Self {
        TransportResponse { status: 200, data }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestConfig {
    pub headers: BTreeMap<String, String>,
    /// Overrides the client-wide timeout.
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn with_headers(headers: BTreeMap<String, String>) -> Self {
        RequestConfig {
            headers,
            timeout: None,
        }
    }
}

// =============================================================================
// Transport Port
// =============================================================================

/// Network collaborator. One call per operation replay.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse>;

    async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse>;

    async fn put(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse>;

    async fn patch(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse>;

    async fn delete(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse>;

    /// Dispatches on a stored method.
    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        match method {
            HttpMethod::Get => self.get(url, body, config).await,
            HttpMethod::Post => self.post(url, body, config).await,
            HttpMethod::Put => self.put(url, body, config).await,
            HttpMethod::Patch => self.patch(url, body, config).await,
            HttpMethod::Delete => self.delete(url, body, config).await,
        }
    }
}

// =============================================================================
// HTTP Adapter
// =============================================================================

/// reqwest-backed transport.
///
/// ## Usage
/// ```rust,ignore
/// let transport = HttpTransport::new(&config.api)?;
/// let response = transport
///     .execute(HttpMethod::Post, "/mf1/receipts", Some(&body), &RequestConfig::default())
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Builds a client with the configured timeout and default headers.
    pub fn new(settings: &ApiSettings) -> OfflineResult<Self> {
        let mut base_url = Url::parse(&settings.base_url)?;

        // Keep the base path when joining relative endpoints
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &settings.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| OfflineError::InvalidConfig(format!("header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| OfflineError::InvalidConfig(format!("header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| OfflineError::InvalidConfig(e.to_string()))?;

        Ok(HttpTransport { client, base_url })
    }

    /// Resolves an endpoint against the base URL.
    ///
    /// Absolute `http(s)://` endpoints are used verbatim.
    pub fn resolve(&self, endpoint: &str) -> TransportResult<Url> {
        let resolved = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Url::parse(endpoint)
        } else {
            self.base_url.join(endpoint.trim_start_matches('/'))
        };
        resolved.map_err(|e| TransportError::InvalidRequest(format!("bad endpoint '{}': {}", endpoint, e)))
    }

    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        let url = self.resolve(endpoint)?;
        debug!(%method, %url, "Sending request");

        let mut request = self.client.request(to_reqwest_method(method), url);
        for (name, value) in &config.headers {
            validate_header(name, value).map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_send_error)?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            let mut message = String::from_utf8_lossy(&bytes).into_owned();
            if message.is_empty() {
                message = status.canonical_reason().unwrap_or("unknown status").to_string();
            }
            truncate_at_char_boundary(&mut message, MAX_ERROR_BODY);
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let data = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::InvalidResponse(e.to_string()))?
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            data,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        self.send(HttpMethod::Get, url, body, config).await
    }

    async fn post(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        self.send(HttpMethod::Post, url, body, config).await
    }

    async fn put(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        self.send(HttpMethod::Put, url, body, config).await
    }

    async fn patch(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        self.send(HttpMethod::Patch, url, body, config).await
    }

    async fn delete(
        &self,
        url: &str,
        body: Option<&Value>,
        config: &RequestConfig,
    ) -> TransportResult<TransportResponse> {
        self.send(HttpMethod::Delete, url, body, config).await
    }
}

/// Builder errors can never succeed on replay; everything else on the send
/// path (connect, timeout, reset mid-request) is treated as network.
fn classify_send_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(&ApiSettings {
            base_url: base.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_retry_classification() {
        assert!(TransportError::Network("connection refused".into()).is_retryable());
        for status in [500, 502, 503, 429] {
            let err = TransportError::Http {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "{} should be retryable", status);
        }
        for status in [400, 401, 404, 409, 422] {
            let err = TransportError::Http {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "{} should be terminal", status);
        }
        assert!(!TransportError::InvalidResponse("eof".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad header".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_bad_stored_header_is_terminal() {
        let t = transport("http://127.0.0.1:9");
        let mut headers = BTreeMap::new();
        headers.insert("X-Note".to_string(), "line1\nline2".to_string());

        let err = t
            .post("/mf1/receipts", None, &RequestConfig::with_headers(headers))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::InvalidRequest(_)), "{:?}", err);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unresolvable_endpoint_is_request_error() {
        let t = transport("https://api.example.it");
        let err = t.resolve("http://[::1").unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[test]
    fn test_resolve_keeps_base_path() {
        let t = transport("https://api.example.it/v1");
        assert_eq!(
            t.resolve("/mf1/receipts").unwrap().as_str(),
            "https://api.example.it/v1/mf1/receipts"
        );

        let t = transport("https://api.example.it");
        assert_eq!(
            t.resolve("mf1/cashiers/7").unwrap().as_str(),
            "https://api.example.it/mf1/cashiers/7"
        );
        assert_eq!(
            t.resolve("https://other.example.it/x").unwrap().as_str(),
            "https://other.example.it/x"
        );
    }

    #[test]
    fn test_invalid_default_header_rejected() {
        let mut settings = ApiSettings::default();
        settings
            .default_headers
            .insert("bad header".into(), "x".into());
        assert!(matches!(
            HttpTransport::new(&settings),
            Err(OfflineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut text = "è".repeat(10);
        truncate_at_char_boundary(&mut text, 5);
        assert_eq!(text, "èè");
    }
}
