//! A non-blocking, concurrent HTTP/1.x client pool
//!
//! This crate drives many HTTP/1.0 and HTTP/1.1 requests at once from a
//! single thread. Requests are attached to a [`pool::Pool`], which runs one
//! readiness-multiplexed loop over all of their sockets, decodes each
//! response incrementally as bytes arrive, follows redirects by attaching
//! new requests to itself, and invokes per-request completion handlers that
//! may attach further requests while the loop is still running.
//!
//! # Features
//!
//! - Plain TCP and TLS (rustls) transports
//! - Incremental response head parsing
//! - Chunked transfer coding and gzip / deflate content codings
//! - Redirect following for 301, 302 and 307, bounded per request
//! - Completion handlers able to grow the request graph mid-run
//! - A single pool-wide readiness timeout
//!
//! # Example
//!
//! ```no_run
//! use micro_http_pool::pool::Pool;
//! use micro_http_pool::protocol::{Options, Request, Response};
//!
//! let mut pool = Pool::builder()
//!     .options(Options::new().timeout(5.0).header("User-Agent", "micro-http-pool"))
//!     .build()
//!     .unwrap();
//!
//! let mut request = Request::new("http://example.com/").unwrap();
//! request.on_complete(|response: &Response, pool: &mut Pool| {
//!     if response.is_success() {
//!         pool.attach_url("http://example.com/about", None).unwrap();
//!     }
//! });
//!
//! pool.attach(request).unwrap();
//! for (id, response) in pool.run().unwrap() {
//!     match response.content() {
//!         Ok(body) => println!("{id} {:?}: {} bytes", response.status(), body.len()),
//!         Err(e) => println!("{id} undecodable body: {e}"),
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: requests, responses, headers, options and errors
//! - [`codec`]: chunked transfer decoding and content decoding
//! - [`connection`]: per-connection state and the non-blocking transport
//! - [`pool`]: the reactor loop, redirects and completion handlers
//!
//! # Error Handling
//!
//! - [`protocol::Error`]: raised by construction, attach and [`pool::Pool::run`]
//! - [`protocol::ParseError`]: wire level decoding errors, recorded on the
//!   affected response while the pool runs
//!
//! # Limitations
//!
//! - One request per connection (`Connection: close`), no keep-alive or pipelining
//! - No request bodies
//! - No cookies
//! - Only `http` and `https` URLs

pub mod codec;
pub mod connection;
pub mod pool;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
