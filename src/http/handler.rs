//! Handler boundary.
//!
//! The core hands every parsed [`Request`] to a [`Handler`] and writes
//! whatever [`Response`] comes back. Requests on one connection are
//! dispatched one at a time. Returned errors and panics both become a
//! `500 Internal Server Error`; the core never lets them escape the
//! connection.

use std::future::Future;

use crate::http::request::Request;
use crate::http::response::Response;

/// Error type handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a handler invocation.
pub type HandlerResult = Result<Response, BoxError>;

/// Application collaborator that turns requests into responses.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = HandlerResult> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send,
{
    fn handle(&self, request: Request) -> impl Future<Output = HandlerResult> + Send {
        (self)(request)
    }
}

/// The canned responder: `200 OK` with `Hello, World!` for every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloWorld;

impl Handler for HelloWorld {
    async fn handle(&self, _request: Request) -> HandlerResult {
        Ok(Response::ok("Hello, World!"))
    }
}
