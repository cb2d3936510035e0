//! Per-connection lifecycle.
//!
//! A [`Session`] owns one accepted connection and its concurrency slot and
//! drives it through:
//!
//! ```text
//!            ┌──────────────────────── keep-alive ───────────────────────┐
//!            ▼                                                           │
//!  Idle ─▶ ReadingHead ─▶ ReadingBody ─▶ Dispatching ─▶ Writing ─────────┤
//!   │          │              │               │            │             │
//!   └──────────┴──────────────┴───────────────┴────────────┴─▶ Closing ─▶ Closed
//! ```
//!
//! Requests on a connection are handled strictly one at a time; pipelined
//! requests wait in the read buffer and are answered in arrival order.
//! Whatever path leads to `Closed`, the socket is shut down and the slot
//! is returned to the pool exactly once.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BytesMut};
use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{self, Instant as Deadline};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::http::handler::Handler;
use crate::http::parser::{ParseLimits, ParseStatus, Progress, RequestParser};
use crate::http::request::{Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, WriteContext, WriteError, CONTINUE_RESPONSE};
use crate::net::{Connection, ConnectionId, ConnectionSlot};
use crate::observability::metrics;

/// Header a client may use to supply its own correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Between requests, waiting for the first byte of the next one.
    Idle,
    ReadingHead,
    ReadingBody,
    /// The handler owns the request.
    Dispatching,
    Writing,
    Closing,
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side, between requests or mid-request.
    PeerClosed,
    IdleTimeout,
    /// Head or body did not arrive in time; answered with 408.
    ReadTimeout,
    /// Answered with 400.
    Malformed,
    /// A response was sent with `Connection: close`.
    NotKeptAlive,
    /// The handler failed, panicked or overran its deadline.
    HandlerFailed,
    /// The server started draining while the connection was idle.
    Draining,
    Io,
}

enum Fill {
    Data,
    Eof,
    TimedOut,
    Draining,
    Failed(std::io::Error),
}

/// One connection being served.
pub struct Session<H> {
    conn: Connection,
    slot: ConnectionSlot,
    handler: Arc<H>,
    config: Arc<ServerConfig>,
    draining: watch::Receiver<bool>,
    parser: RequestParser,
    writer: ResponseWriter,
    buffer: BytesMut,
    state: ConnState,
    deadline: Option<Deadline>,
    /// When the first byte of the current request arrived.
    request_started: Option<Instant>,
    continue_sent: bool,
    served: usize,
    _active: metrics::ActiveConnection,
}

impl<H: Handler> Session<H> {
    pub fn new(
        conn: Connection,
        slot: ConnectionSlot,
        handler: Arc<H>,
        config: Arc<ServerConfig>,
        draining: watch::Receiver<bool>,
    ) -> Self {
        let parser = RequestParser::new(ParseLimits::from(&config.limits));
        let buffer = BytesMut::with_capacity(config.limits.read_buffer_size);
        Self {
            conn,
            slot,
            handler,
            config,
            draining,
            parser,
            writer: ResponseWriter::new(),
            buffer,
            state: ConnState::Idle,
            deadline: None,
            request_started: None,
            continue_sent: false,
            served: 0,
            _active: metrics::record_connection_accepted(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Serve the connection until it closes. Returns why it closed.
    pub async fn run(mut self) -> CloseReason {
        let span = tracing::info_span!(
            "connection",
            conn_id = %self.conn.id(),
            peer = %self.conn.peer_addr()
        );
        async move {
            tracing::debug!("Connection opened");
            let reason = self.serve().await;
            self.close(reason).await;
            reason
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            match self.parser.parse(&self.buffer) {
                ParseStatus::Complete(request, consumed) => {
                    self.buffer.advance(consumed);
                    self.continue_sent = false;
                    self.deadline = None;
                    self.request_started = None;
                    if let Some(reason) = self.dispatch(request).await {
                        return reason;
                    }
                    self.transition(ConnState::Idle);
                }
                ParseStatus::Malformed(reason) => {
                    tracing::debug!(error = %reason, "Malformed request");
                    metrics::record_parse_error();
                    self.send_error(StatusCode::BAD_REQUEST).await;
                    return CloseReason::Malformed;
                }
                ParseStatus::Incomplete(progress) => {
                    self.enter_read_state(progress);
                    if let Progress::Body {
                        expects_continue: true,
                    } = progress
                    {
                        if !self.continue_sent {
                            self.continue_sent = true;
                            if let Err(e) = self.send_continue().await {
                                tracing::debug!(error = %e, "Failed to send 100 Continue");
                                return CloseReason::Io;
                            }
                        }
                    }

                    match self.fill().await {
                        Fill::Data => {}
                        Fill::Eof => {
                            if !self.buffer.is_empty() {
                                tracing::debug!(
                                    buffered = self.buffer.len(),
                                    "Peer closed mid-request"
                                );
                            }
                            return CloseReason::PeerClosed;
                        }
                        Fill::TimedOut if self.state == ConnState::Idle => {
                            return CloseReason::IdleTimeout;
                        }
                        Fill::TimedOut => {
                            tracing::debug!(state = ?self.state, "Request read timed out");
                            self.send_error(StatusCode::REQUEST_TIMEOUT).await;
                            return CloseReason::ReadTimeout;
                        }
                        Fill::Draining => return CloseReason::Draining,
                        Fill::Failed(e) => {
                            tracing::debug!(error = %e, "Read failed");
                            return CloseReason::Io;
                        }
                    }
                }
            }
        }
    }

    /// Pick the read state for the bytes buffered so far and arm its deadline.
    fn enter_read_state(&mut self, progress: Progress) {
        let next = match progress {
            _ if self.buffer.is_empty() => ConnState::Idle,
            Progress::Head => ConnState::ReadingHead,
            Progress::Body { .. } => ConnState::ReadingBody,
        };
        if next == self.state && self.deadline.is_some() {
            return;
        }

        let timeouts = &self.config.timeouts;
        let window = match next {
            ConnState::Idle => timeouts.idle(),
            ConnState::ReadingHead => timeouts.header_read(),
            _ => timeouts.body_read(),
        };
        self.deadline = Some(Deadline::now() + window);
        if self.state == ConnState::Idle && next != ConnState::Idle {
            self.request_started = Some(Instant::now());
        }
        self.transition(next);
    }

    /// Read more bytes into the buffer before the current deadline.
    async fn fill(&mut self) -> Fill {
        let deadline = self
            .deadline
            .unwrap_or_else(|| Deadline::now() + self.config.timeouts.idle());
        let idle = self.state == ConnState::Idle;
        if idle && *self.draining.borrow() {
            return Fill::Draining;
        }

        self.buffer.reserve(self.config.limits.read_buffer_size);
        let stream = self.conn.stream_mut();
        let read = time::timeout_at(deadline, stream.read_buf(&mut self.buffer));

        let outcome = if idle {
            tokio::select! {
                outcome = read => outcome,
                _ = self.draining.wait_for(|draining| *draining) => return Fill::Draining,
            }
        } else {
            read.await
        };

        match outcome {
            Ok(Ok(0)) => Fill::Eof,
            Ok(Ok(_)) => Fill::Data,
            Ok(Err(e)) => Fill::Failed(e),
            Err(_) => Fill::TimedOut,
        }
    }

    /// Hand one request to the handler and write its response.
    ///
    /// Returns `Some` when the connection must close afterwards.
    async fn dispatch(&mut self, request: Request) -> Option<CloseReason> {
        self.transition(ConnState::Dispatching);
        let started = Instant::now();
        let request_id = request
            .header(X_REQUEST_ID)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            target = %request.target()
        );

        async move {
            let version = request.version();
            let ctx = WriteContext::for_request(request.method(), version);
            let mut keep_alive = request.wants_keep_alive() && self.keep_alive_allowed();

            let (response, failed) = self.invoke(request).await;
            if failed || response.wants_close() || *self.draining.borrow() {
                keep_alive = false;
            }
            let response = connection_header(response, version, keep_alive);
            let status = response.status();

            self.transition(ConnState::Writing);
            let written = time::timeout(
                self.config.timeouts.write(),
                self.writer.write(self.conn.stream_mut(), response, ctx),
            )
            .await
            .unwrap_or(Err(WriteError::TimedOut));
            self.served += 1;
            metrics::record_request(status.as_u16(), started);

            match written {
                Ok(bytes) => {
                    tracing::debug!(
                        status = status.as_u16(),
                        body_bytes = bytes,
                        keep_alive,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Request completed"
                    );
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Response write failed");
                    return Some(CloseReason::Io);
                }
            }

            if failed {
                Some(CloseReason::HandlerFailed)
            } else if !keep_alive {
                Some(CloseReason::NotKeptAlive)
            } else {
                None
            }
        }
        .instrument(span)
        .await
    }

    /// Run the handler under the request deadline. The flag reports
    /// whether the response was synthesized because the handler failed.
    async fn invoke(&self, request: Request) -> (Response, bool) {
        let handler = Arc::clone(&self.handler);
        let call = AssertUnwindSafe(handler.handle(request)).catch_unwind();

        match time::timeout(self.config.timeouts.request(), call).await {
            Ok(Ok(Ok(response))) => (response, false),
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "Handler returned an error");
                (Response::error(StatusCode::INTERNAL_SERVER_ERROR), true)
            }
            Ok(Err(panic)) => {
                tracing::error!(panic = %panic_message(&*panic), "Handler panicked");
                (Response::error(StatusCode::INTERNAL_SERVER_ERROR), true)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.timeouts.request_ms,
                    "Handler exceeded request deadline"
                );
                (Response::error(StatusCode::GATEWAY_TIMEOUT), true)
            }
        }
    }

    fn keep_alive_allowed(&self) -> bool {
        let keep_alive = &self.config.keep_alive;
        let limit = keep_alive.max_requests_per_connection;
        keep_alive.enabled && (limit == 0 || self.served + 1 < limit)
    }

    async fn send_continue(&mut self) -> Result<(), WriteError> {
        let stream = self.conn.stream_mut();
        let write = async {
            stream.write_all(CONTINUE_RESPONSE).await?;
            stream.flush().await
        };
        match time::timeout(self.config.timeouts.write(), write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WriteError::TimedOut),
        }
    }

    /// Best-effort error response before closing.
    async fn send_error(&mut self, status: StatusCode) {
        self.transition(ConnState::Writing);
        let response = Response::error(status).header("Connection", "close");
        let written = time::timeout(
            self.config.timeouts.write(),
            self.writer
                .write(self.conn.stream_mut(), response, WriteContext::default()),
        )
        .await;
        let started = self.request_started.unwrap_or_else(Instant::now);
        metrics::record_request(status.as_u16(), started);
        if !matches!(written, Ok(Ok(_))) {
            tracing::debug!(status = status.as_u16(), "Could not deliver error response");
        }
    }

    async fn close(&mut self, reason: CloseReason) {
        self.transition(ConnState::Closing);
        let _ = time::timeout(
            self.config.timeouts.write(),
            self.conn.stream_mut().shutdown(),
        )
        .await;

        if let Err(e) = self.slot.release() {
            tracing::warn!(error = %e, "Connection slot release failed");
        }
        self.transition(ConnState::Closed);
        tracing::debug!(
            ?reason,
            requests = self.served,
            age_ms = self.conn.age().as_millis() as u64,
            "Connection closed"
        );
    }

    fn transition(&mut self, next: ConnState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "State transition");
            self.state = next;
        }
    }
}

/// Set the `Connection` header to match the keep-alive decision.
///
/// HTTP/1.1 keep-alive is the default and gets no header; HTTP/1.0 peers
/// must be told explicitly.
fn connection_header(mut response: Response, version: Version, keep_alive: bool) -> Response {
    if !keep_alive {
        response.headers_mut().remove("connection");
        response.headers_mut().append("Connection", "close");
    } else if version == Version::Http10 {
        response.headers_mut().remove("connection");
        response.headers_mut().append("Connection", "keep-alive");
    }
    response
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
