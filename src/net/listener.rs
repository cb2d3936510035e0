//! TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections and wrap them as [`Connection`]s
//! - Classify accept errors as transient or fatal
//!
//! Slot acquisition happens after accept (see `http::server`) so an
//! exhausted pool rejects the new connection instead of stalling the
//! kernel backlog.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::ListenerConfig;
use crate::net::connection::Connection;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),
}

impl ListenerError {
    /// Whether the listening socket itself is unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            ListenerError::Bind { .. } => true,
            ListenerError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput
            ),
        }
    }

    /// Whether the process ran out of descriptors or memory; worth backing off.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            ListenerError::Accept(e) => {
                e.raw_os_error()
                    .is_some_and(|code| EXHAUSTION_ERRNOS.contains(&code))
                    || e.kind() == io::ErrorKind::OutOfMemory
            }
            ListenerError::Bind { .. } => false,
        }
    }
}

/// ENFILE, EMFILE, ENOBUFS and ENOMEM. Only ENOBUFS differs between
/// Linux and the BSD family.
#[cfg(target_os = "linux")]
const EXHAUSTION_ERRNOS: &[i32] = &[23, 24, 105, 12];
#[cfg(all(unix, not(target_os = "linux")))]
const EXHAUSTION_ERRNOS: &[i32] = &[23, 24, 55, 12];
#[cfg(not(unix))]
const EXHAUSTION_ERRNOS: &[i32] = &[];

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    tcp_nodelay: bool,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let address = config.bind_address();
        let bind_err = |source| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let listener = TcpListener::bind(address.as_str()).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(
            address = %local_addr,
            max_concurrency = config.max_concurrency,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            tcp_nodelay: config.tcp_nodelay,
        })
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> Result<Connection, ListenerError> {
        let (stream, peer_addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        if self.tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        Ok(Connection::new(stream, peer_addr))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }
}
