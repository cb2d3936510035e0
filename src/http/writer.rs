//! Response serialization.
//!
//! Emits the status line, the handler's headers in insertion order, and
//! exactly one framing header chosen from the body:
//!
//! | Body                     | Framing                         |
//! |--------------------------|---------------------------------|
//! | empty / full bytes       | `Content-Length`                |
//! | stream, HTTP/1.1 peer    | `Transfer-Encoding: chunked`    |
//! | stream, HTTP/1.0 peer    | collected, then `Content-Length`|
//! | 1xx / 204 / 304 status   | none, and no body               |
//!
//! Framing headers supplied by the handler are discarded.

use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::handler::BoxError;
use crate::http::request::{Method, Version};
use crate::http::response::{Body, BodyStream, Response, StatusCode};

/// Interim response sent before reading a body the client is holding back.
pub const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Error type for response writes.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    /// The handler's body stream failed after the head was sent.
    #[error("response body failed: {0}")]
    Body(#[source] BoxError),
    #[error("write timed out")]
    TimedOut,
}

/// What the writer needs to know about the request being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteContext {
    /// Send headers only (`HEAD` requests).
    pub head_only: bool,
    /// The peer understands chunked coding.
    pub chunked_allowed: bool,
}

impl WriteContext {
    pub fn for_request(method: Method, version: Version) -> Self {
        Self {
            head_only: method == Method::Head,
            chunked_allowed: version.supports_chunked(),
        }
    }
}

impl Default for WriteContext {
    fn default() -> Self {
        Self {
            head_only: false,
            chunked_allowed: true,
        }
    }
}

enum Payload {
    Nothing,
    Bytes(Bytes),
    Chunks(BodyStream),
}

/// Serializes responses onto a connection. Reuses its head buffer.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Write `response` fully and flush. Returns the body bytes sent.
    pub async fn write<W>(
        &mut self,
        out: &mut W,
        response: Response,
        ctx: WriteContext,
    ) -> Result<u64, WriteError>
    where
        W: AsyncWrite + Unpin,
    {
        let (status, mut headers, body) = response.into_parts();
        headers.remove("content-length");
        headers.remove("transfer-encoding");

        let payload = if !status.allows_body() {
            Payload::Nothing
        } else {
            match body {
                Body::Empty => Payload::Bytes(Bytes::new()),
                Body::Full(bytes) => Payload::Bytes(bytes),
                Body::Stream(stream) if ctx.chunked_allowed => Payload::Chunks(stream),
                Body::Stream(stream) => Payload::Bytes(collect(stream).await?),
            }
        };

        self.buffer.clear();
        self.write_status(status);
        for (name, value) in headers.iter() {
            if !is_safe_header(name, value) {
                tracing::warn!(header = %name, "Dropping response header with invalid bytes");
                continue;
            }
            self.write_header(name, value);
        }
        match &payload {
            Payload::Nothing => {}
            Payload::Bytes(bytes) => self.write_header("Content-Length", &bytes.len().to_string()),
            Payload::Chunks(_) => self.write_header("Transfer-Encoding", "chunked"),
        }
        self.buffer.extend_from_slice(b"\r\n");
        out.write_all(&self.buffer).await?;

        let mut sent = 0u64;
        if !ctx.head_only {
            match payload {
                Payload::Nothing => {}
                Payload::Bytes(bytes) => {
                    out.write_all(&bytes).await?;
                    sent = bytes.len() as u64;
                }
                Payload::Chunks(mut stream) => {
                    while let Some(fragment) = stream.next().await {
                        let fragment = fragment.map_err(WriteError::Body)?;
                        if fragment.is_empty() {
                            // A zero-size chunk would end the body early.
                            continue;
                        }
                        out.write_all(format!("{:X}\r\n", fragment.len()).as_bytes())
                            .await?;
                        out.write_all(&fragment).await?;
                        out.write_all(b"\r\n").await?;
                        sent += fragment.len() as u64;
                    }
                    out.write_all(b"0\r\n\r\n").await?;
                }
            }
        }

        out.flush().await?;
        Ok(sent)
    }

    fn write_status(&mut self, status: StatusCode) {
        self.buffer.extend_from_slice(b"HTTP/1.1 ");
        self.buffer
            .extend_from_slice(status.as_u16().to_string().as_bytes());
        self.buffer.push(b' ');
        self.buffer.extend_from_slice(status.reason().as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
    }

    fn write_header(&mut self, name: &str, value: &str) {
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(b": ");
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.extend_from_slice(b"\r\n");
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect(mut stream: BodyStream) -> Result<Bytes, WriteError> {
    let mut body = BytesMut::new();
    while let Some(fragment) = stream.next().await {
        body.extend_from_slice(&fragment.map_err(WriteError::Body)?);
    }
    Ok(body.freeze())
}

/// Names must be non-empty and values free of CR/LF so a handler cannot
/// inject extra header lines.
fn is_safe_header(name: &str, value: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':')
        && !value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
}
