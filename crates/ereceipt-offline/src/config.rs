//! # Offline Configuration
//!
//! Configuration management for the offline queue and sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     EREC_API_BASE_URL=https://api.example.it                           │
//! │     EREC_MAX_QUEUE_SIZE=500                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/offline-agent/offline.toml (Linux)                       │
//! │     ~/Library/Application Support/it.ereceipt.offline-agent/ (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [queue]
//! max_queue_size = 1000
//! batch_size = 10
//! default_max_retries = 3
//!
//! [sync]
//! base_retry_delay_ms = 1000
//! max_retry_delay_ms = 30000
//! backoff_multiplier = 2.0
//! inter_batch_delay_ms = 500
//!
//! [api]
//! base_url = "https://api.example.it"
//! request_timeout_secs = 30
//!
//! [connectivity]
//! probe_interval_secs = 15
//!
//! [storage]
//! database_path = "/var/lib/ereceipt/offline.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use ereceipt_core::validation::{validate_max_retries, validate_queue_limits};
use ereceipt_core::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES, QUEUE_STORAGE_KEY,
};

use crate::error::{OfflineError, OfflineResult};

// =============================================================================
// Queue Settings
// =============================================================================

/// Sizing and persistence settings for the operation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Upper bound on queued operations.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Operations pulled per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry budget for operations that don't set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Storage key holding the queue snapshot.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_storage_key() -> String {
    QUEUE_STORAGE_KEY.to_string()
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_queue_size: default_max_queue_size(),
            batch_size: default_batch_size(),
            default_max_retries: default_max_retries(),
            storage_key: default_storage_key(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Drain pacing and retry backoff.
///
/// ## Backoff
/// ```text
/// delay(retry_count) = min(base × multiplier^retry_count, max)
///
/// base = 1000ms, multiplier = 2.0, max = 30000ms
///   retry 0 → 1s, retry 1 → 2s, retry 2 → 4s, ... retry 5+ → 30s
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_base_retry_delay")]
    pub base_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Pause between consecutive batches of one drain pass.
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_base_retry_delay() -> u64 {
    1000
}
fn default_max_retry_delay() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_inter_batch_delay() -> u64 {
    500
}
fn default_event_capacity() -> usize {
    256
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            base_retry_delay_ms: default_base_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            inter_batch_delay_ms: default_inter_batch_delay(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SyncSettings {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// Remote fiscal-receipt API the queue replays against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL relative endpoints are joined onto.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Headers sent with every request (e.g. `Authorization`).
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            default_headers: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Reachability probe used by the agent to feed the connectivity signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// URL probed for reachability. Falls back to `api.base_url`.
    #[serde(default)]
    pub probe_url: Option<String>,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_probe_interval() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    5
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_url: None,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete offline engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl OfflineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (offline.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> OfflineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading offline config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load offline config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> OfflineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| OfflineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Offline config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OfflineResult<()> {
        validate_queue_limits(self.queue.max_queue_size, self.queue.batch_size)
            .map_err(|e| OfflineError::InvalidConfig(e.to_string()))?;
        validate_max_retries(self.queue.default_max_retries)
            .map_err(|e| OfflineError::InvalidConfig(e.to_string()))?;

        if self.queue.storage_key.trim().is_empty() {
            return Err(OfflineError::InvalidConfig(
                "storage_key must not be empty".into(),
            ));
        }

        if !self.sync.backoff_multiplier.is_finite() || self.sync.backoff_multiplier < 1.0 {
            return Err(OfflineError::InvalidConfig(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.sync.backoff_multiplier
            )));
        }

        if self.sync.base_retry_delay_ms > self.sync.max_retry_delay_ms {
            return Err(OfflineError::InvalidConfig(format!(
                "base_retry_delay_ms ({}) exceeds max_retry_delay_ms ({})",
                self.sync.base_retry_delay_ms, self.sync.max_retry_delay_ms
            )));
        }

        if self.sync.event_capacity == 0 {
            return Err(OfflineError::InvalidConfig(
                "event_capacity must be greater than 0".into(),
            ));
        }

        validate_http_url(&self.api.base_url)?;
        if let Some(ref probe) = self.connectivity.probe_url {
            validate_http_url(probe)?;
        }

        Ok(())
    }

    /// Applies overrides looked up by variable name.
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EREC_API_BASE_URL") {
            debug!(url = %url, "Overriding API base URL from environment");
            self.api.base_url = url;
        }

        override_parsed(&lookup, "EREC_MAX_QUEUE_SIZE", &mut self.queue.max_queue_size);
        override_parsed(&lookup, "EREC_BATCH_SIZE", &mut self.queue.batch_size);
        override_parsed(&lookup, "EREC_MAX_RETRIES", &mut self.queue.default_max_retries);
        override_parsed(
            &lookup,
            "EREC_BASE_RETRY_DELAY_MS",
            &mut self.sync.base_retry_delay_ms,
        );
        override_parsed(
            &lookup,
            "EREC_MAX_RETRY_DELAY_MS",
            &mut self.sync.max_retry_delay_ms,
        );
        override_parsed(
            &lookup,
            "EREC_BACKOFF_MULTIPLIER",
            &mut self.sync.backoff_multiplier,
        );
        override_parsed(
            &lookup,
            "EREC_INTER_BATCH_DELAY_MS",
            &mut self.sync.inter_batch_delay_ms,
        );

        if let Some(path) = lookup("EREC_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("EREC_PROBE_URL") {
            self.connectivity.probe_url = Some(url);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("offline.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// SQLite path, falling back to the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage
            .database_path
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("offline.db")))
    }

    /// URL the connectivity probe hits.
    pub fn probe_url(&self) -> &str {
        self.connectivity
            .probe_url
            .as_deref()
            .unwrap_or(&self.api.base_url)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("it", "ereceipt", "offline-agent")
}

fn validate_http_url(raw: &str) -> OfflineResult<()> {
    let url = url::Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(OfflineError::InvalidUrl(format!(
            "URL must use http or https, got {}: {}",
            other, raw
        ))),
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => {
                debug!(key, "Overriding setting from environment");
                *target = value;
            }
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}
