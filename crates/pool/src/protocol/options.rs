//! Request options and their validated form.
//!
//! [`Options`] collects loosely typed overrides exactly as a caller supplies
//! them. [`Settings::resolve`] validates a set of options and produces the
//! fixed-field form the rest of the crate works with. The same validation
//! runs for pool defaults, per-request options and the merge of the two.

use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::protocol::{Error, HeaderStore};
use crate::ensure;

/// Seconds a request may wait for readiness when no timeout is configured.
pub const DEFAULT_TIMEOUT: f64 = 30.0;

/// Redirect hops followed when no limit is configured.
pub const DEFAULT_MAX_REDIRECTS: u32 = 3;

/// Bytes read per readiness event until the response head is parsed.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Lower bound applied to every configured timeout.
pub const DEFAULT_MIN_TIMEOUT: f64 = 0.1;

const ALLOWED_METHODS: [Method; 8] = [
    Method::GET,
    Method::POST,
    Method::HEAD,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
    Method::CONNECT,
];

/// Opaque TLS configuration handed through to https connections.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<rustls::ClientConfig>,
}

impl TlsContext {
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        Self { config }
    }

    /// A client configuration trusting the Mozilla root set shipped by `webpki-roots`.
    pub fn with_webpki_roots() -> Result<Self, Error> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::config(format!("unable to build the default tls context: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::new(Arc::new(config)))
    }

    pub fn config(&self) -> &Arc<rustls::ClientConfig> {
        &self.config
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

/// Unvalidated option overrides.
///
/// Every field is optional; unset fields fall back to the pool defaults and
/// then to the crate defaults.
///
/// ```
/// use micro_http_pool::protocol::Options;
///
/// let options = Options::new()
///     .timeout(5.0)
///     .max_redirects(2)
///     .method("HEAD")
///     .header("Accept", "text/html");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Options {
    timeout: Option<f64>,
    max_redirects: Option<i64>,
    headers: Vec<(String, String)>,
    method: Option<String>,
    chunk_size: Option<usize>,
    context: Option<TlsContext>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readiness timeout in seconds, floored at the pool minimum.
    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Redirect hops to follow; must be greater than zero.
    pub fn max_redirects(mut self, hops: i64) -> Self {
        self.max_redirects = Some(hops);
        self
    }

    pub fn header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, N, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    /// One of GET, POST, HEAD, PUT, DELETE, OPTIONS, TRACE or CONNECT.
    pub fn method<M: Into<String>>(mut self, method: M) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Read size used until the response head has been parsed.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn context(mut self, context: TlsContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Layers `self` over `defaults`: set fields win, headers from both are
    /// kept with `self`'s applied last.
    pub fn merged_over(&self, defaults: &Options) -> Options {
        let mut headers = defaults.headers.clone();
        headers.extend(self.headers.iter().cloned());
        Options {
            timeout: self.timeout.or(defaults.timeout),
            max_redirects: self.max_redirects.or(defaults.max_redirects),
            headers,
            method: self.method.clone().or_else(|| defaults.method.clone()),
            chunk_size: self.chunk_size.or(defaults.chunk_size),
            context: self.context.clone().or_else(|| defaults.context.clone()),
        }
    }
}

/// Validated options.
#[derive(Debug, Clone)]
pub struct Settings {
    timeout: f64,
    max_redirects: u32,
    headers: HeaderStore,
    method: Method,
    chunk_size: usize,
    context: Option<TlsContext>,
}

impl Settings {
    /// Validates `options`, filling unset fields with the crate defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the timeout is not a finite number, the
    /// redirect limit is not positive, the method is not one of the supported
    /// verbs, the chunk size is zero, or a header contains CR, LF or NUL.
    pub fn resolve(options: &Options, min_timeout: f64) -> Result<Self, Error> {
        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        ensure!(timeout.is_finite(), Error::config(format!("timeout must be a finite number of seconds, got {timeout}")));

        let max_redirects = match options.max_redirects {
            Some(hops) => {
                ensure!(hops > 0, Error::config(format!("max_redirects must be greater than zero, got {hops}")));
                u32::try_from(hops).map_err(|e| Error::config(format!("max_redirects {hops} is out of range: {e}")))?
            }
            None => DEFAULT_MAX_REDIRECTS,
        };

        let method = match options.method.as_deref() {
            Some(method) => parse_method(method)?,
            None => Method::GET,
        };

        let chunk_size = options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        ensure!(chunk_size > 0, Error::config("chunk_size must be greater than zero"));

        let headers: HeaderStore = options.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
        ensure_sendable(&headers)?;

        Ok(Self {
            timeout: timeout.max(min_timeout),
            max_redirects,
            headers,
            method,
            chunk_size,
            context: options.context.clone(),
        })
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn context(&self) -> Option<&TlsContext> {
        self.context.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            headers: HeaderStore::new(),
            method: Method::GET,
            chunk_size: DEFAULT_CHUNK_SIZE,
            context: None,
        }
    }
}

/// Names one field of [`Settings`] for [`Pool::default_option`](crate::pool::Pool::default_option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Timeout,
    MaxRedirects,
    Headers,
    Method,
    ChunkSize,
    Context,
}

/// The value of one [`Settings`] field.
#[derive(Debug, Clone, Copy)]
pub enum OptionValue<'a> {
    Timeout(f64),
    MaxRedirects(u32),
    Headers(&'a HeaderStore),
    Method(&'a Method),
    ChunkSize(usize),
    Context(Option<&'a TlsContext>),
}

impl Settings {
    pub fn get(&self, key: OptionKey) -> OptionValue<'_> {
        match key {
            OptionKey::Timeout => OptionValue::Timeout(self.timeout),
            OptionKey::MaxRedirects => OptionValue::MaxRedirects(self.max_redirects),
            OptionKey::Headers => OptionValue::Headers(&self.headers),
            OptionKey::Method => OptionValue::Method(&self.method),
            OptionKey::ChunkSize => OptionValue::ChunkSize(self.chunk_size),
            OptionKey::Context => OptionValue::Context(self.context.as_ref()),
        }
    }
}

/// Rejects headers that would inject extra lines into a request head.
pub(crate) fn ensure_sendable(headers: &HeaderStore) -> Result<(), Error> {
    match headers.first_unsendable() {
        Some((name, value)) => Err(Error::config(format!("header {name:?} contains CR, LF or NUL: {value:?}"))),
        None => Ok(()),
    }
}

/// Accepts only the upper-case verbs this client knows how to send.
pub fn parse_method(method: &str) -> Result<Method, Error> {
    ALLOWED_METHODS
        .iter()
        .find(|allowed| allowed.as_str() == method)
        .cloned()
        .ok_or_else(|| Error::config(format!("method must be one of GET, POST, HEAD, PUT, DELETE, OPTIONS, TRACE or CONNECT, got {method:?}")))
}
