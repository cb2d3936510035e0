//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the connection-handling core.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, concurrency bound).
    pub listener: ListenerConfig,

    /// Per-phase timeouts.
    pub timeouts: TimeoutConfig,

    /// Parser limits.
    pub limits: LimitsConfig,

    /// Persistent connection policy.
    pub keep_alive: KeepAliveConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host to bind ("127.0.0.1" for loopback, "0.0.0.0" for all interfaces).
    pub host: String,

    /// TCP port. Port 0 asks the OS for an ephemeral port.
    pub port: u16,

    /// Maximum concurrently active connections (connection slots).
    pub max_concurrency: usize,

    /// How long the acceptor waits for a free slot before rejecting.
    /// Zero rejects immediately when the pool is exhausted.
    pub accept_timeout_ms: u64,

    /// Disable Nagle's algorithm on accepted sockets.
    pub tcp_nodelay: bool,
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_concurrency: 1024,
            accept_timeout_ms: 0,
            tcp_nodelay: true,
        }
    }
}

/// Timeout configuration for each connection phase.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle time allowed between requests on a connection.
    pub idle_ms: u64,

    /// Time allowed for a started request head to arrive completely.
    pub header_read_ms: u64,

    /// Time allowed for the whole body to arrive once the head is parsed.
    pub body_read_ms: u64,

    /// Time allowed to write a full response.
    pub write_ms: u64,

    /// Deadline for the handler to produce a response.
    pub request_ms: u64,

    /// Grace period for in-flight connections on shutdown.
    pub drain_ms: u64,
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn header_read(&self) -> Duration {
        Duration::from_millis(self.header_read_ms)
    }

    pub fn body_read(&self) -> Duration {
        Duration::from_millis(self.body_read_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_ms: 60_000,
            header_read_ms: 10_000,
            body_read_ms: 30_000,
            write_ms: 30_000,
            request_ms: 30_000,
            drain_ms: 10_000,
        }
    }
}

/// Request parsing limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request line length in bytes, excluding CRLF.
    pub max_request_line_len: usize,

    /// Maximum header line length in bytes, excluding CRLF.
    pub max_header_line_len: usize,

    /// Maximum number of header fields.
    pub max_headers: usize,

    /// Maximum decoded body size in bytes.
    pub max_body_size: usize,

    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_line_len: 8 * 1024,
            max_header_line_len: 8 * 1024,
            max_headers: 100,
            max_body_size: 2 * 1024 * 1024, // 2MB
            read_buffer_size: 8 * 1024,
        }
    }
}

/// Persistent connection policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Allow connections to be reused for multiple requests.
    pub enabled: bool,

    /// Requests served on one connection before it is closed (0 = unlimited).
    pub max_requests_per_connection: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_connection: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
