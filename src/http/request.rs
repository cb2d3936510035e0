//! Parsed HTTP requests.

use bytes::Bytes;

use crate::http::headers::Headers;

/// Request method.
///
/// The four common verbs plus `HEAD` get their own variants; the remaining
/// registered methods are carried by `Other` with their canonical name.
/// Unknown tokens never reach this type: the parser rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Other(&'static str),
}

const OTHER_METHODS: &[&str] = &["OPTIONS", "PATCH", "TRACE", "CONNECT"];

impl Method {
    /// Recognize a method token. Matching is case-sensitive.
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"HEAD" => Some(Method::Head),
            other => OTHER_METHODS
                .iter()
                .copied()
                .find(|m| m.as_bytes() == other)
                .map(Method::Other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version from the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        match token {
            b"HTTP/1.0" => Some(Version::Http10),
            b"HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    /// HTTP/1.1 connections persist unless told otherwise; HTTP/1.0 ones don't.
    pub fn keep_alive_by_default(&self) -> bool {
        matches!(self, Version::Http11)
    }

    /// Whether the peer understands chunked transfer coding.
    pub fn supports_chunked(&self) -> bool {
        matches!(self, Version::Http11)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully parsed request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    body: Bytes,
}

impl Request {
    pub fn new(
        method: Method,
        target: impl Into<String>,
        version: Version,
        headers: Headers,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            target: target.into(),
            version,
            headers,
            body,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Request target as sent (path plus optional query).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Path component of the target.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Decoded body; empty when the request carried none.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the client asked for the connection to stay open.
    pub fn wants_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.version.keep_alive_by_default() || self.headers.has_token("connection", "keep-alive")
    }
}
