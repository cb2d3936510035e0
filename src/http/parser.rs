//! Incremental HTTP/1.1 request parser.
//!
//! [`RequestParser::parse`] is called with the connection's accumulating
//! buffer after every read and answers one of:
//!
//! - [`ParseStatus::Incomplete`]: more bytes are needed,
//! - [`ParseStatus::Complete`]: a request plus how many bytes it used,
//! - [`ParseStatus::Malformed`]: the bytes can never form a valid request.
//!
//! The request head is re-scanned on each call (its size is bounded by the
//! line and header-count limits). Once the head is complete the parser
//! remembers it, along with chunked-decoding progress, until the request
//! completes, so a slowly arriving body is decoded once.
//!
//! # Example
//!
//! ```
//! use keepalive_core::http::parser::{ParseLimits, ParseStatus, RequestParser};
//!
//! let mut parser = RequestParser::new(ParseLimits::default());
//! let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
//!
//! assert!(matches!(parser.parse(&raw[..20]), ParseStatus::Incomplete(_)));
//! match parser.parse(raw) {
//!     ParseStatus::Complete(request, consumed) => {
//!         assert_eq!(request.body().as_ref(), b"hello");
//!         assert_eq!(consumed, raw.len());
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use bytes::{Bytes, BytesMut};

use crate::config::LimitsConfig;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};

/// Why a byte sequence can never become a valid request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Malformed {
    #[error("request line exceeds {0} bytes")]
    RequestLineTooLong(usize),
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("unrecognized method")]
    UnknownMethod,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("header line exceeds {0} bytes")]
    HeaderLineTooLong(usize),
    #[error("invalid header line")]
    InvalidHeader,
    #[error("more than {0} header fields")]
    TooManyHeaders(usize),
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("invalid chunk framing")]
    InvalidChunk,
    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// Which part of the request is still arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Request line or header fields.
    Head,
    /// Head parsed; waiting for body bytes.
    Body { expects_continue: bool },
}

/// Outcome of one parse attempt.
#[derive(Debug)]
pub enum ParseStatus {
    Incomplete(Progress),
    /// A request and the number of buffer bytes it occupied.
    Complete(Request, usize),
    Malformed(Malformed),
}

/// Parser limits. Line lengths exclude the terminating CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_request_line_len: usize,
    pub max_header_line_len: usize,
    pub max_headers: usize,
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for ParseLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_request_line_len: config.max_request_line_len,
            max_header_line_len: config.max_header_line_len,
            max_headers: config.max_headers,
            max_body_size: config.max_body_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    None,
    Length(usize),
    Chunked,
}

#[derive(Debug)]
struct Head {
    method: Method,
    target: String,
    version: Version,
    headers: Headers,
    framing: Framing,
    body_start: usize,
}

#[derive(Debug, Default)]
struct ChunkProgress {
    /// Offset of the next chunk-size line (or trailer line).
    pos: usize,
    decoded: BytesMut,
    in_trailers: bool,
    trailers: usize,
}

#[derive(Debug)]
struct Pending {
    head: Head,
    chunks: ChunkProgress,
}

type Step<T> = Result<Option<T>, Malformed>;

/// Incremental request parser for one connection.
#[derive(Debug)]
pub struct RequestParser {
    limits: ParseLimits,
    pending: Option<Pending>,
}

impl RequestParser {
    pub fn new(limits: ParseLimits) -> Self {
        Self {
            limits,
            pending: None,
        }
    }

    pub fn limits(&self) -> &ParseLimits {
        &self.limits
    }

    /// Forget any partially parsed request.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Parse the accumulating buffer.
    ///
    /// Between calls the caller may only append to `buf`. After `Complete`
    /// it removes the consumed prefix; after `Malformed` the connection is
    /// expected to close.
    pub fn parse(&mut self, buf: &[u8]) -> ParseStatus {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| buf.len() < p.head.body_start)
        {
            self.pending = None;
        }

        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match parse_head(buf, &self.limits) {
                Ok(Some(head)) => {
                    let body_start = head.body_start;
                    Pending {
                        head,
                        chunks: ChunkProgress {
                            pos: body_start,
                            ..ChunkProgress::default()
                        },
                    }
                }
                Ok(None) => return ParseStatus::Incomplete(Progress::Head),
                Err(reason) => return ParseStatus::Malformed(reason),
            },
        };

        let body_start = pending.head.body_start;
        let finished = match pending.head.framing {
            Framing::None => Ok(Some((Bytes::new(), body_start))),
            Framing::Length(len) => Ok((buf.len() - body_start >= len).then(|| {
                (
                    Bytes::copy_from_slice(&buf[body_start..body_start + len]),
                    body_start + len,
                )
            })),
            Framing::Chunked => decode_chunks(buf, &mut pending.chunks, &self.limits),
        };

        match finished {
            Ok(Some((body, consumed))) => {
                let head = pending.head;
                let request = Request::new(head.method, head.target, head.version, head.headers, body);
                ParseStatus::Complete(request, consumed)
            }
            Ok(None) => {
                let expects_continue = pending.head.version == Version::Http11
                    && pending.head.headers.has_token("expect", "100-continue");
                self.pending = Some(pending);
                ParseStatus::Incomplete(Progress::Body { expects_continue })
            }
            Err(reason) => ParseStatus::Malformed(reason),
        }
    }
}

/// Next CRLF-terminated line starting at `pos`.
///
/// Returns the line (without CRLF) and the offset after it. A line longer
/// than `max` is rejected even before its terminator arrives.
fn next_line(buf: &[u8], pos: usize, max: usize) -> Result<Option<(&[u8], usize)>, ()> {
    let rest = &buf[pos..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) if end > max => Err(()),
        Some(end) => Ok(Some((&rest[..end], pos + end + 2))),
        None => {
            let pending = if rest.ends_with(b"\r") {
                rest.len() - 1
            } else {
                rest.len()
            };
            if pending > max {
                Err(())
            } else {
                Ok(None)
            }
        }
    }
}

fn parse_head(buf: &[u8], limits: &ParseLimits) -> Step<Head> {
    // Tolerate stray CRLFs between pipelined requests.
    let mut pos = 0;
    while buf[pos..].starts_with(b"\r\n") {
        pos += 2;
        if pos > limits.max_request_line_len {
            return Err(Malformed::RequestLineTooLong(limits.max_request_line_len));
        }
    }

    let (line, mut pos) = match next_line(buf, pos, limits.max_request_line_len)
        .map_err(|_| Malformed::RequestLineTooLong(limits.max_request_line_len))?
    {
        Some(found) => found,
        None => return Ok(None),
    };
    let (method, target, version) = parse_request_line(line)?;

    let mut headers = Headers::new();
    loop {
        let (line, next) = match next_line(buf, pos, limits.max_header_line_len)
            .map_err(|_| Malformed::HeaderLineTooLong(limits.max_header_line_len))?
        {
            Some(found) => found,
            None => return Ok(None),
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        if headers.len() == limits.max_headers {
            return Err(Malformed::TooManyHeaders(limits.max_headers));
        }
        let (name, value) = parse_header_line(line)?;
        headers.append(name, value);
    }

    let framing = body_framing(&headers, limits)?;
    Ok(Some(Head {
        method,
        target,
        version,
        headers,
        framing,
        body_start: pos,
    }))
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), Malformed> {
    let mut parts = line.split(|&b| b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Malformed::InvalidRequestLine);
    };
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(Malformed::InvalidRequestLine);
    }

    if !method.iter().all(|&b| is_token_char(b)) {
        return Err(Malformed::InvalidRequestLine);
    }
    let method = Method::from_bytes(method).ok_or(Malformed::UnknownMethod)?;
    let version = Version::from_bytes(version).ok_or(Malformed::UnsupportedVersion)?;

    if !target.iter().all(|&b| (0x21..=0x7e).contains(&b)) {
        return Err(Malformed::InvalidTarget);
    }
    let acceptable = match target {
        [b'/', ..] => true,
        b"*" => method == Method::Other("OPTIONS"),
        _ if method == Method::Other("CONNECT") => !target.contains(&b'/'),
        _ => is_absolute_form(target),
    };
    if !acceptable {
        return Err(Malformed::InvalidTarget);
    }

    // Every byte was checked to be visible ASCII above.
    let target = String::from_utf8_lossy(target).into_owned();
    Ok((method, target, version))
}

fn is_absolute_form(target: &[u8]) -> bool {
    let Some(colon) = target.windows(3).position(|w| w == b"://") else {
        return false;
    };
    let scheme = &target[..colon];
    scheme.first().is_some_and(u8::is_ascii_alphabetic)
        && scheme
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), Malformed> {
    // Obsolete line folding.
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(Malformed::InvalidHeader);
    }
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(Malformed::InvalidHeader)?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_token_char(b)) {
        return Err(Malformed::InvalidHeader);
    }

    let value = trim_ows(&line[colon + 1..]);
    if value
        .iter()
        .any(|&b| b == 0x7f || (b < 0x20 && b != b'\t'))
    {
        return Err(Malformed::InvalidHeader);
    }
    let value = std::str::from_utf8(value).map_err(|_| Malformed::InvalidHeader)?;
    let name = String::from_utf8_lossy(name).into_owned();
    Ok((name, value.to_string()))
}

fn body_framing(headers: &Headers, limits: &ParseLimits) -> Result<Framing, Malformed> {
    let has_length = headers.contains("content-length");
    let has_encoding = headers.contains("transfer-encoding");

    if has_length && has_encoding {
        return Err(Malformed::ConflictingFraming);
    }

    if has_encoding {
        let mut codings = headers
            .get_all("transfer-encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty());
        return match (codings.next(), codings.next()) {
            (Some(coding), None) if coding.eq_ignore_ascii_case("chunked") => Ok(Framing::Chunked),
            _ => Err(Malformed::UnsupportedTransferEncoding),
        };
    }

    if has_length {
        let mut length: Option<usize> = None;
        for candidate in headers
            .get_all("content-length")
            .flat_map(|v| v.split(','))
            .map(str::trim)
        {
            if candidate.is_empty() || !candidate.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Malformed::InvalidContentLength);
            }
            let parsed: usize = candidate
                .parse()
                .map_err(|_| Malformed::InvalidContentLength)?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(Malformed::InvalidContentLength)
                }
                _ => length = Some(parsed),
            }
        }
        let length = length.ok_or(Malformed::InvalidContentLength)?;
        if length > limits.max_body_size {
            return Err(Malformed::BodyTooLarge(limits.max_body_size));
        }
        return Ok(if length == 0 {
            Framing::None
        } else {
            Framing::Length(length)
        });
    }

    Ok(Framing::None)
}

/// Continue decoding a chunked body from `progress.pos`.
fn decode_chunks(
    buf: &[u8],
    progress: &mut ChunkProgress,
    limits: &ParseLimits,
) -> Step<(Bytes, usize)> {
    loop {
        let (line, next) = match next_line(buf, progress.pos, limits.max_header_line_len) {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(None),
            Err(()) if progress.in_trailers => {
                return Err(Malformed::HeaderLineTooLong(limits.max_header_line_len))
            }
            Err(()) => return Err(Malformed::InvalidChunk),
        };

        if progress.in_trailers {
            progress.pos = next;
            if line.is_empty() {
                let body = std::mem::take(&mut progress.decoded).freeze();
                return Ok(Some((body, next)));
            }
            // Trailer fields are validated and dropped.
            progress.trailers += 1;
            if progress.trailers > limits.max_headers {
                return Err(Malformed::TooManyHeaders(limits.max_headers));
            }
            parse_header_line(line)?;
            continue;
        }

        let size = parse_chunk_size(line)?;
        if progress.decoded.len().saturating_add(size) > limits.max_body_size {
            return Err(Malformed::BodyTooLarge(limits.max_body_size));
        }

        if size == 0 {
            progress.pos = next;
            progress.in_trailers = true;
            continue;
        }

        let data_end = next + size;
        if buf.len() < data_end + 2 {
            // Reject a wrong terminator as soon as it is visible.
            if buf.len() > data_end && buf[data_end] != b'\r' {
                return Err(Malformed::InvalidChunk);
            }
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(Malformed::InvalidChunk);
        }
        progress.decoded.extend_from_slice(&buf[next..data_end]);
        progress.pos = data_end + 2;
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, Malformed> {
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = trim_ows(size);
    if size.is_empty() || size.len() > 16 || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(Malformed::InvalidChunk);
    }
    // Only hex digits remain, so this is valid UTF-8.
    let digits = std::str::from_utf8(size).map_err(|_| Malformed::InvalidChunk)?;
    usize::from_str_radix(digits, 16).map_err(|_| Malformed::InvalidChunk)
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`'
            | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}
