//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and the
//! relationships between limits. Every problem is reported, not just the
//! first one.

use std::net::IpAddr;

use tokio::sync::Semaphore;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `listener.port`.
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

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be in 1..=65535"));
    }
    if listener.host.is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    } else if listener.host != "localhost" && listener.host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.host",
            format!("'{}' is not an IP address", listener.host),
        ));
    }
    if listener.max_concurrency == 0 {
        errors.push(ValidationError::new(
            "listener.max_concurrency",
            "must be at least 1",
        ));
    } else if listener.max_concurrency > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::new(
            "listener.max_concurrency",
            format!("must be at most {}", Semaphore::MAX_PERMITS),
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.idle_ms", timeouts.idle_ms),
        ("timeouts.header_read_ms", timeouts.header_read_ms),
        ("timeouts.body_read_ms", timeouts.body_read_ms),
        ("timeouts.write_ms", timeouts.write_ms),
        ("timeouts.request_ms", timeouts.request_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let limits = &config.limits;
    for (field, value) in [
        ("limits.max_request_line_len", limits.max_request_line_len),
        ("limits.max_header_line_len", limits.max_header_line_len),
        ("limits.max_headers", limits.max_headers),
        ("limits.read_buffer_size", limits.read_buffer_size),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    // "GET / HTTP/1.1" is the shortest useful request line.
    if limits.max_request_line_len != 0 && limits.max_request_line_len < 14 {
        errors.push(ValidationError::new(
            "limits.max_request_line_len",
            "must be at least 14",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
