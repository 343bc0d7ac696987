use std::io;
use thiserror::Error;

/// Top level error type returned by request construction, attachment and
/// the reactor loop.
///
/// Construction and attach time failures (`Config`, `InvalidUrl`,
/// `Connection`) are raised synchronously before any I/O happens. Inside
/// [`Pool::run`](crate::pool::Pool::run) only `RedirectResolution`,
/// `EmptyPool`, `AlreadyRunning` and `Reactor` escape; every other failure
/// is recorded on the affected [`Response`](crate::protocol::Response).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid option: {reason}")]
    Config { reason: String },

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unable to open a socket to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: ParseError,
    },

    #[error("unable to construct a valid redirect target from {location:?} received from {url}")]
    RedirectResolution { location: String, url: String },

    #[error("no requests attached to the pool")]
    EmptyPool,

    #[error("the pool is already running")]
    AlreadyRunning,

    #[error("readiness wait failed: {source}")]
    Reactor {
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn config<S: ToString>(reason: S) -> Self {
        Self::Config { reason: reason.to_string() }
    }

    pub fn invalid_url<U: ToString, S: ToString>(url: U, reason: S) -> Self {
        Self::InvalidUrl { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn connection<T: ToString, E: Into<io::Error>>(target: T, e: E) -> Self {
        Self::Connection { target: target.to_string(), source: e.into() }
    }

    pub fn redirect_resolution<L: ToString, U: ToString>(location: L, url: U) -> Self {
        Self::RedirectResolution { location: location.to_string(), url: url.to_string() }
    }

    pub fn reactor<E: Into<io::Error>>(e: E) -> Self {
        Self::Reactor { source: e.into() }
    }

    /// Returns true for the wire level failures grouped under `ProtocolParseError`.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }
}

/// Errors raised while decoding bytes received from the peer.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed status line: {line:?}")]
    StatusLine { line: String },

    #[error("malformed header line: {line:?}")]
    MalformedHeader { line: String },

    #[error("response head too large: {size} bytes exceeds the {max} byte limit")]
    TooLargeHead { size: usize, max: usize },

    #[error("{coding} content inflates past the {max} byte limit")]
    TooLargeContent { coding: &'static str, max: usize },

    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },

    #[error("unable to decode {coding} content: {source}")]
    ContentCoding {
        coding: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn status_line<S: ToString>(line: S) -> Self {
        Self::StatusLine { line: line.to_string() }
    }

    pub fn malformed_header<S: ToString>(line: S) -> Self {
        Self::MalformedHeader { line: line.to_string() }
    }

    pub fn too_large_head(size: usize, max: usize) -> Self {
        Self::TooLargeHead { size, max }
    }

    pub fn too_large_content(coding: &'static str, max: usize) -> Self {
        Self::TooLargeContent { coding, max }
    }

    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }

    pub fn content_coding<E: Into<io::Error>>(coding: &'static str, e: E) -> Self {
        Self::ContentCoding { coding, source: e.into() }
    }
}
