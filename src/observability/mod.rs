//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener / session / writer produce:
//!     → logging.rs (structured events inside connection and request spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Every connection gets a span carrying its id and peer address
//! - Every request gets a span carrying a request id (client supplied
//!   `X-Request-ID` or a fresh UUID v4)

pub mod logging;
pub mod metrics;
