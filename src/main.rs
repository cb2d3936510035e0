//! keepalive-core server binary.
//!
//! Serves `Hello, World!` on every request using the connection core.
//! Settings come from an optional TOML file, overridden by flags.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use keepalive_core::config::validation::validate_config;
use keepalive_core::config::watcher::ConfigWatcher;
use keepalive_core::config::{load_config_with, ConfigError, ServerConfig};
use keepalive_core::http::{HelloWorld, HttpServer};
use keepalive_core::lifecycle::{shutdown_signal, Shutdown};
use keepalive_core::observability::{logging, metrics};

#[derive(Parser, Clone)]
#[command(name = "keepalive-core")]
#[command(about = "Concurrent HTTP/1.1 server with keep-alive", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum connections served at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Reload the configuration file when it changes
    #[arg(long, requires = "config")]
    watch: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(max) = self.max_concurrency {
            config.listener.max_concurrency = max;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_with(path, |config| cli.apply_overrides(config))?,
        None => {
            let mut config = ServerConfig::default();
            cli.apply_overrides(&mut config);
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("keepalive-core v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address(),
        max_concurrency = config.listener.max_concurrency,
        idle_timeout_ms = config.timeouts.idle_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::bind(config, HelloWorld).await?;
    tracing::info!(address = %server.local_addr()?, "Listening for connections");

    // The watcher stops when dropped, so it lives until main returns.
    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let flags = cli.clone();
            let watcher = watcher.with_overrides(move |config| flags.apply_overrides(config));
            (Some(watcher.run()?), updates)
        }
        _ => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
