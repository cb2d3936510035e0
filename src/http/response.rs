//! Responses built by handlers.
//!
//! A [`Response`] is consumed exactly once by the writer: `write` takes it
//! by value. Bodies are either known upfront ([`Body::Full`]) or produced
//! lazily ([`Body::Stream`]), which decides the framing on the wire.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::http::handler::BoxError;
use crate::http::headers::Headers;

/// Status code outside 100..=599.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status code {0}, expected 100..=599")]
pub struct InvalidStatusCode(pub u16);

/// HTTP status code, guaranteed to be in 100..=599.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);

    pub fn new(code: u16) -> Result<Self, InvalidStatusCode> {
        if (100..=599).contains(&code) {
            Ok(Self(code))
        } else {
            Err(InvalidStatusCode(code))
        }
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Reason phrase for the status line.
    pub fn reason(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            411 => "Length Required",
            413 => "Content Too Large",
            415 => "Unsupported Media Type",
            417 => "Expectation Failed",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    pub fn is_informational(&self) -> bool {
        self.0 < 200
    }

    /// 1xx, 204 and 304 responses never carry a body or framing header.
    pub fn allows_body(&self) -> bool {
        !(self.is_informational() || self.0 == 204 || self.0 == 304)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = InvalidStatusCode;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

/// Lazily produced body fragments.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Response body.
pub enum Body {
    Empty,
    /// Size known upfront; framed with `Content-Length`.
    Full(Bytes),
    /// Produced fragment by fragment; framed with chunked coding.
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Full(bytes)
        }
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

/// A response produced by a handler.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// `200 OK` with the given body.
    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// Plain-text response the core synthesizes for protocol errors.
    pub(crate) fn error(status: StatusCode) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .with_body(status.reason().to_string())
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Use a lazily produced body, sent with chunked framing.
    pub fn with_stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        self.body = Body::Stream(stream.boxed());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether the handler asked for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("connection", "close")
    }

    pub fn into_parts(self) -> (StatusCode, Headers, Body) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_range() {
        assert!(StatusCode::new(99).is_err());
        assert_eq!(StatusCode::new(100).unwrap(), StatusCode::CONTINUE);
        assert_eq!(StatusCode::new(599).unwrap().reason(), "Unknown");
        assert_eq!(StatusCode::try_from(600), Err(InvalidStatusCode(600)));
        assert_eq!(StatusCode::OK.to_string(), "200 OK");
    }

    #[test]
    fn bodiless_statuses() {
        assert!(!StatusCode::CONTINUE.allows_body());
        assert!(!StatusCode::NO_CONTENT.allows_body());
        assert!(!StatusCode::NOT_MODIFIED.allows_body());
        assert!(StatusCode::OK.allows_body());
        assert!(StatusCode::BAD_REQUEST.allows_body());
    }

    #[test]
    fn builder_keeps_header_order() {
        let response = Response::ok("hi")
            .header("X-B", "2")
            .header("X-A", "1")
            .header("Connection", "close");

        let names: Vec<_> = response.headers().iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["X-B", "X-A", "Connection"]);
        assert!(response.wants_close());
        assert!(matches!(response.body(), Body::Full(b) if b.as_ref() == b"hi"));
    }

    #[test]
    fn empty_bytes_become_empty_body() {
        let response = Response::ok(String::new());
        assert!(matches!(response.body(), Body::Empty));
    }
}
