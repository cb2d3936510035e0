//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself: editors
//! that save by writing a temporary file and renaming it over the original
//! replace the inode, and a watch on the old inode would go silent.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config_with;
use crate::config::schema::ServerConfig;

type Overrides = Arc<dyn Fn(&mut ServerConfig) + Send + Sync>;

/// Publishes a validated [`ServerConfig`] each time the file changes.
///
/// Files that fail to parse or validate are logged and skipped; the
/// receiver only ever sees configurations that would pass at startup.
pub struct ConfigWatcher {
    path: PathBuf,
    overrides: Overrides,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                overrides: Arc::new(|_| {}),
                update_tx,
            },
            update_rx,
        )
    }

    /// Apply `overrides` to every reloaded file before it is validated.
    pub fn with_overrides(
        mut self,
        overrides: impl Fn(&mut ServerConfig) + Send + Sync + 'static,
    ) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file_name: OsString = self
            .path
            .file_name()
            .ok_or_else(|| notify::Error::generic("config path does not name a file"))?
            .to_os_string();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let ConfigWatcher {
            path,
            overrides,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if !touches_file {
                        return;
                    }
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config_with(&path, |config| (*overrides)(config)) {
                        Ok(new_config) => {
                            let _ = update_tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
