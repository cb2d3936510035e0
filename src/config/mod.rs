//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via ArcSwap snapshot with every new connection
//!
//! On file change:
//!     watcher.rs detects change (direct write or rename into place)
//!     → loader.rs loads new config, re-applying command-line overrides
//!     → validation.rs validates
//!     → server swaps the snapshot; live connections keep theirs
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Listener settings are fixed at bind time

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_config_with, ConfigError};
pub use schema::{
    KeepAliveConfig, LimitsConfig, ListenerConfig, ObservabilityConfig, ServerConfig,
    TimeoutConfig,
};
