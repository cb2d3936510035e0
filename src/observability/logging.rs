//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level so operators can raise
//! verbosity for a single run without touching the config file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    format!("keepalive_core={}", config.log_level)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(
    config: &ObservabilityConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config).into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_targets_crate() {
        let mut config = ObservabilityConfig::default();
        config.log_level = "debug".into();
        assert_eq!(default_filter(&config), "keepalive_core=debug");
    }
}
