//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, error classification)
//!     → pool.rs (acquire a connection slot or reject)
//!     → connection.rs (id, peer, accept time)
//!     → Hand off to the HTTP session
//! ```
//!
//! # Design Decisions
//! - Bounded slot pool prevents resource exhaustion
//! - Slots release on drop, so aborted tasks never leak capacity

pub mod connection;
pub mod listener;
pub mod pool;

pub use connection::{Connection, ConnectionId};
pub use listener::{Listener, ListenerError};
pub use pool::{ConnectionSlot, SlotError, SlotPool};
