//! The single-threaded reactor driving attached requests.
//!
//! # Loop
//!
//! [`Pool::run`] repeats until no connection is left open:
//!
//! 1. Snapshot the open connections. Anything attached after this point,
//!    by a redirect or a completion handler, waits for the next iteration.
//! 2. Wait until at least one snapshot socket is ready, bounded by the
//!    largest timeout among attached requests. If the wait times out, every
//!    open connection is closed as timed out and the loop ends.
//! 3. Perform one read on every readable socket, in registration order.
//!    Redirects are followed as soon as the response head is parsed, and a
//!    connection reaching a terminal state runs its completion handlers
//!    right away.
//! 4. Perform one write on every writable socket, in registration order.
//! 5. Pause briefly before the next iteration.
//!
//! # Errors
//!
//! Per-connection failures (refused connects, I/O errors, malformed
//! responses, exhausted redirects) are recorded on the affected
//! [`Response`](crate::protocol::Response) and never abort the loop. Only an
//! unresolvable redirect target and a failing readiness wait end `run` with
//! an error.
//!
//! # Example
//!
//! ```no_run
//! use micro_http_pool::pool::Pool;
//! use micro_http_pool::protocol::{Options, Response};
//!
//! let mut pool = Pool::builder().options(Options::new().timeout(10.0)).build().unwrap();
//! pool.attach_url("http://example.com/", None).unwrap()
//!     .attach_url("https://example.org/", Some(Options::new().max_redirects(2))).unwrap();
//!
//! for (id, response) in pool.run().unwrap() {
//!     println!("{id}: {:?} {}", response.status(), response.state());
//! }
//! ```

mod handler;
mod reactor;
mod redirect;

pub use handler::CompletionHandler;
pub use reactor::{Pool, PoolBuilder};
pub use redirect::resolve_redirect;
