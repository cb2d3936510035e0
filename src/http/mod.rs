//! HTTP/1.1 protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! accepted connection + slot
//!     → server.rs (accept loop, admission, drain)
//!     → session.rs (per-connection state machine, timeouts, keep-alive)
//!         → parser.rs (bytes → Request, incremental)
//!         → handler.rs (Request → Response, user code)
//!         → writer.rs (Response → bytes, framing)
//!     → slot released when the session closes
//! ```
//!
//! # Design Decisions
//! - One task per connection; requests on a connection are sequential
//! - Parsing works on an accumulating buffer, so any split of the input
//!   across reads yields the same requests
//! - Protocol errors are answered by the core (400, 408, 500, 504); the
//!   handler never sees malformed input

pub mod handler;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod writer;

pub use handler::{BoxError, Handler, HandlerResult, HelloWorld};
pub use headers::Headers;
pub use parser::{Malformed, ParseLimits, ParseStatus, RequestParser};
pub use request::{Method, Request, Version};
pub use response::{Body, Response, StatusCode};
pub use server::{HttpServer, ServerError};
pub use session::{CloseReason, ConnState, Session};
pub use writer::{ResponseWriter, WriteContext, WriteError};
