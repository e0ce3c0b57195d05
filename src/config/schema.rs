//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the edge relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request hardening and client identification.
    pub security: SecurityConfig,

    /// Backing store selection.
    pub store: StoreConfig,

    /// Access log retention.
    pub access_log: AccessLogConfig,

    /// Upstream redirect handling.
    pub redirects: RedirectConfig,

    /// IP to city lookup.
    pub geo: GeoConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed until response headers are produced, in seconds.
    /// Streaming bodies are not bound by this.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 60,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered request body size in bytes.
    pub max_body_size: usize,

    /// Header set by the hosting edge that carries the real client IP.
    /// Falls back to the socket peer address when absent.
    pub client_ip_header: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 16 * 1024 * 1024, // 16MB
            client_ip_header: "cf-connecting-ip".to_string(),
        }
    }
}

/// Which store implementation backs the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file for the sqlite backend.
    pub path: String,

    /// Users created (enabled) on first start if missing.
    pub seed_users: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "edge-relay.db".to_string(),
            seed_users: Vec::new(),
        }
    }
}

/// Access log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// Newest rows kept; older rows are trimmed on every append.
    pub max_entries: usize,

    /// Rows older than this are removed by the cleanup sweep.
    pub retention_days: u32,

    /// Minimum spacing between two cleanup sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            max_entries: 2000,
            retention_days: 7,
            cleanup_interval_secs: 30 * 60,
        }
    }
}

impl AccessLogConfig {
    pub fn retention_secs(&self) -> i64 {
        i64::from(self.retention_days) * 86_400
    }
}

/// Redirect handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// How long the direct-domain list is served from memory before
    /// it is re-read from the store.
    pub cache_ttl_secs: u64,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 60 }
    }
}

/// Geo lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,

    /// Base URL of the lookup service; `/{ip}/json/` is appended.
    pub endpoint: String,

    /// Cached lookups (including empty results) are reused this long.
    pub ttl_secs: u64,

    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://ipapi.co".to_string(),
            ttl_secs: 7 * 86_400,
            timeout_secs: 5,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Admin password; doubles as the session signing secret.
    /// The admin API refuses every request while this is unset.
    pub password: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
