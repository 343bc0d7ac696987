//! Per-connection state owned by the pool.
//!
//! # Components
//!
//! - [`ClientConnection`]: one request, its response and the socket carrying
//!   them, identified by a [`ConnectionId`]:
//!   - Serializes the request lazily on the first write attempt
//!   - Performs one non-blocking read or write per readiness event
//!   - Feeds received bytes to the response decoder
//!
//! - [`Transport`]: the non-blocking socket under a connection, plain TCP or
//!   TLS, with its readiness reported as [`Readiness`]

mod client_connection;
mod transport;

pub use client_connection::{ClientConnection, ConnectionId, ReadEvent, WriteEvent};
pub use transport::{Readiness, Transport};
