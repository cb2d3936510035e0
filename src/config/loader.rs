//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    parse_config_with(content, |_| {})
}

/// Parse TOML text, apply `overrides`, then validate the result.
pub fn parse_config_with(
    content: &str,
    overrides: impl FnOnce(&mut ServerConfig),
) -> Result<ServerConfig, ConfigError> {
    let mut config: ServerConfig = toml::from_str(content)?;
    overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    load_config_with(path, |_| {})
}

/// Load a TOML file, apply `overrides`, then validate the result.
///
/// Command-line flags go through here so a reloaded file cannot undo them.
pub fn load_config_with(
    path: &Path,
    overrides: impl FnOnce(&mut ServerConfig),
) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_with(&content, overrides)
}
