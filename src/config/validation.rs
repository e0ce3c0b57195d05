//! Configuration validation.
//!
//! Serde handles syntax; this module checks values that parse but make no
//! sense (zero caps, unparsable addresses). Every problem is reported, not
//! just the first.

use std::net::SocketAddr;

use crate::config::schema::{ProxyConfig, StoreBackend};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }

    if config.security.client_ip_header.trim().is_empty() {
        errors.push(ValidationError::new("security.client_ip_header", "must not be empty"));
    }

    if config.store.backend == StoreBackend::Sqlite && config.store.path.trim().is_empty() {
        errors.push(ValidationError::new("store.path", "required for the sqlite backend"));
    }

    if config.access_log.max_entries == 0 {
        errors.push(ValidationError::new("access_log.max_entries", "must be > 0"));
    }
    if config.access_log.retention_days == 0 {
        errors.push(ValidationError::new("access_log.retention_days", "must be > 0"));
    }
    if config.access_log.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new("access_log.cleanup_interval_secs", "must be > 0"));
    }

    if config.geo.enabled && url::Url::parse(&config.geo.endpoint).is_err() {
        errors.push(ValidationError::new(
            "geo.endpoint",
            format!("'{}' is not a URL", config.geo.endpoint),
        ));
    }

    if let Some(password) = &config.admin.password {
        if password.is_empty() {
            errors.push(ValidationError::new("admin.password", "must not be empty when set"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
