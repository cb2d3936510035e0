//! Server context and accept loop.
//!
//! # Responsibilities
//! - Bind the listener and own the slot pool, handler and live config
//! - Accept connections and gate them on a concurrency slot
//! - Spawn one [`Session`] task per admitted connection
//! - Apply config reloads to connections accepted afterwards
//! - On shutdown: stop accepting, drain, then force-close stragglers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::http::handler::Handler;
use crate::http::session::{CloseReason, Session};
use crate::net::{Connection, Listener, ListenerError, SlotError, SlotPool};
use crate::observability::metrics;

/// Written to connections refused because every slot is taken.
const REJECT_RESPONSE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Error type for server startup and the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP/1.1 server: one listener, one handler, a bounded number of
/// concurrently served connections.
pub struct HttpServer<H> {
    listener: Listener,
    handler: Arc<H>,
    config: Arc<ArcSwap<ServerConfig>>,
    slots: SlotPool,
}

impl<H: Handler> HttpServer<H> {
    /// Bind the configured address. Port 0 picks an ephemeral port.
    pub async fn bind(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        let listener = Listener::bind(&config.listener).await?;
        let slots = SlotPool::new(
            config.listener.max_concurrency,
            config.listener.accept_timeout(),
        );
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            config: Arc::new(ArcSwap::from_pointee(config)),
            slots,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle on the slot pool, for observing occupancy.
    pub fn slots(&self) -> SlotPool {
        self.slots.clone()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    /// Accept and serve connections until `shutdown` fires.
    ///
    /// Returns once every connection has closed, either on its own during
    /// the drain window or by force afterwards. A fatal accept error also
    /// drains and is then returned.
    pub async fn run(
        self,
        mut config_updates: mpsc::UnboundedReceiver<ServerConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let HttpServer {
            listener,
            handler,
            config,
            slots,
        } = self;

        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_concurrency = slots.max_concurrency(),
            "HTTP server starting"
        );

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        let mut backoff = ACCEPT_BACKOFF_MIN;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break Ok(());
                }

                Some(update) = config_updates.recv() => {
                    apply_config(&config, update);
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(joined);
                }

                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        backoff = ACCEPT_BACKOFF_MIN;
                        match slots.acquire().await {
                            Ok(slot) => {
                                let session = Session::new(
                                    conn,
                                    slot,
                                    Arc::clone(&handler),
                                    config.load_full(),
                                    drain_rx.clone(),
                                );
                                sessions.spawn(session.run());
                            }
                            Err(e) => reject(conn, e),
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::error!(error = %e, "Listener failed");
                        break Err(ServerError::from(e));
                    }
                    Err(e) if e.is_resource_exhaustion() => {
                        tracing::warn!(
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "Accept failed, out of resources; backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    }
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
            }
        };

        drop(listener);
        let _ = drain_tx.send(true);
        drain(&mut sessions, config.load().timeouts.drain()).await;
        slots.close();

        tracing::info!("HTTP server stopped");
        outcome
    }
}

/// Wait up to `window` for open sessions, then abort the rest.
async fn drain(sessions: &mut JoinSet<CloseReason>, window: Duration) {
    if sessions.is_empty() {
        return;
    }
    tracing::info!(
        open = sessions.len(),
        window_ms = window.as_millis() as u64,
        "Draining connections"
    );

    let finished = tokio::time::timeout(window, async {
        while let Some(joined) = sessions.join_next().await {
            log_session_end(joined);
        }
    })
    .await;

    if finished.is_err() {
        tracing::warn!(
            remaining = sessions.len(),
            "Drain window elapsed, closing remaining connections"
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

fn apply_config(current: &ArcSwap<ServerConfig>, update: ServerConfig) {
    let previous = current.load();
    if update.listener != previous.listener {
        tracing::warn!("Listener settings changed; they take effect on restart");
    }
    current.store(Arc::new(update));
    tracing::info!("Configuration reloaded, applies to new connections");
}

fn log_session_end(joined: Result<CloseReason, tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Connection task panicked");
        }
    }
}

/// Refuse a connection at capacity. The canned 503 is best effort: it is
/// only sent if the socket can take it without blocking.
fn reject(mut conn: Connection, reason: SlotError) {
    metrics::record_connection_rejected();
    tracing::warn!(
        conn_id = %conn.id(),
        peer = %conn.peer_addr(),
        error = %reason,
        "Rejecting connection"
    );
    let _ = conn.stream_mut().try_write(REJECT_RESPONSE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::HelloWorld;

    fn local_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listener.port = 0;
        config
    }

    #[tokio::test]
    async fn bind_reports_ephemeral_port() {
        let server = HttpServer::bind(local_config(), HelloWorld).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.slots().available(), 1024);
    }

    #[tokio::test]
    async fn reload_replaces_snapshot() {
        let current = ArcSwap::from_pointee(local_config());
        let mut update = local_config();
        update.timeouts.idle_ms = 5;
        apply_config(&current, update);
        assert_eq!(current.load().timeouts.idle_ms, 5);
    }

    #[tokio::test]
    async fn shutdown_without_connections_returns() {
        let server = HttpServer::bind(local_config(), HelloWorld).await.unwrap();
        let (_updates_tx, updates) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        let handle = tokio::spawn(server.run(updates, shutdown));
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
