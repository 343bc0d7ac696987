//! Core HTTP/1.x client protocol types.
//!
//! This module holds everything that describes a single exchange, independent
//! of the reactor that drives it over a socket.
//!
//! # Architecture
//!
//! - **Headers** ([`header`]): the case-insensitive [`HeaderStore`] shared by
//!   requests and responses, with wire serialization and header block parsing
//!
//! - **Options** ([`options`]): loosely typed [`Options`] overrides and their
//!   validated [`Settings`] form
//!   - [`OptionKey`] / [`OptionValue`]: typed lookup of a single setting
//!   - [`TlsContext`]: opaque TLS configuration passed through to https sockets
//!
//! - **Request** ([`request`]): the validated [`Request`], its [`Scheme`] and
//!   [`SocketTarget`], and its wire form
//!
//! - **Response** ([`response`]): the incremental [`Response`] decoder and
//!   its [`State`] machine
//!
//! - **Error Handling** ([`error`]):
//!   - [`Error`]: errors surfaced to callers of the pool
//!   - [`ParseError`]: wire level decoding errors
//!
//! # Example
//!
//! ```
//! use micro_http_pool::protocol::{Options, Request, Response};
//!
//! let mut request = Request::with_options("http://example.com/", Options::new().header("Accept", "*/*")).unwrap();
//! let wire = request.to_wire_bytes();
//! assert!(wire.starts_with(b"GET / HTTP/1.0\r\n"));
//!
//! let mut response = Response::new(&request);
//! response.append_chunk(b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
//! assert!(response.is_success());
//! assert_eq!(&response.content().unwrap()[..], b"ok");
//! ```

pub mod header;
pub mod options;
pub mod request;
pub mod response;

mod error;

pub use error::Error;
pub use error::ParseError;
pub use header::HeaderStore;
pub use options::{OptionKey, OptionValue, Options, Settings, TlsContext};
pub use request::{Request, Scheme, SocketTarget};
pub use response::{Response, State};
