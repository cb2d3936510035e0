//! Concurrent HTTP/1.1 connection-handling core.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net::Listener ──▶ http::HttpServer ──▶ http::Session ──▶ Handler
//!                  accept          slot from            parse request
//!                                  net::SlotPool        write response
//!   Client ◀──────────────────────────────────────────── keep-alive loop
//!
//!   Cross-cutting: config (TOML, hot reload) · lifecycle (signals, drain)
//!                  observability (tracing spans, metrics)
//! ```
//!
//! The server accepts TCP connections, admits at most `max_concurrency`
//! of them at once, and serves each on its own task with persistent
//! (keep-alive) connections, request pipelining, chunked bodies and
//! per-phase timeouts. Application logic plugs in through [`http::Handler`].

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use http::{Handler, HttpServer};
pub use lifecycle::Shutdown;
