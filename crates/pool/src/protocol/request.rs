//! Outgoing request description.
//!
//! A [`Request`] is validated when it is built: the URL must parse, use the
//! `http` or `https` scheme and name a host. Its options are resolved into
//! [`Settings`] at the same time, and resolved again against the pool
//! defaults when the request is attached to a [`Pool`](crate::pool::Pool).
//!
//! The wire form is produced by [`Request::to_wire_bytes`]:
//!
//! ```text
//! GET /index.html?lang=en HTTP/1.0\r\n
//! Host: example.com\r\n
//! Connection: close\r\n
//! \r\n
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, Version};
use url::Url;

use crate::pool::CompletionHandler;
use crate::protocol::options::{DEFAULT_MIN_TIMEOUT, ensure_sendable};
use crate::protocol::{Error, HeaderStore, Options, Settings};
use crate::ensure;

/// URL scheme of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Transport carrying this scheme: `tcp` for http, `tls` for https.
    pub fn transport(&self) -> &'static str {
        match self {
            Self::Http => "tcp",
            Self::Https => "tls",
        }
    }
}

/// Where a request's socket connects, rendered as `<transport>://<host>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketTarget {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl SocketTarget {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host as written in the URL; IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host suitable for name resolution, without IPv6 brackets.
    pub fn resolvable_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }
}

impl fmt::Display for SocketTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.transport(), self.host, self.port)
    }
}

/// One HTTP call: method, target URL, protocol version, headers and options.
pub struct Request {
    url: Url,
    target: SocketTarget,
    host_header: String,
    path: String,
    version: Version,
    headers: HeaderStore,
    overrides: Options,
    settings: Settings,
    redirects_left: Option<u32>,
    handlers: Vec<Box<dyn CompletionHandler>>,
}

impl Request {
    /// Builds a GET request for `url` with default options.
    pub fn new(url: &str) -> Result<Self, Error> {
        Self::with_options(url, Options::new())
    }

    /// Builds a request for `url`, validating `options`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] when `url` does not parse, has no host or uses
    ///   a scheme other than `http`/`https`
    /// - [`Error::Config`] when an option value is invalid
    pub fn with_options(url: &str, options: Options) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|e| Error::invalid_url(url, e))?;
        Self::from_url(url, options)
    }

    pub(crate) fn from_url(url: Url, options: Options) -> Result<Self, Error> {
        let scheme = Scheme::parse(url.scheme())
            .ok_or_else(|| Error::invalid_url(&url, format!("unsupported scheme {:?}", url.scheme())))?;
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::invalid_url(&url, "missing host")),
        };

        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        let path = match url.query() {
            Some(query) => format!("{}?{query}", non_empty_path(url.path())),
            None => non_empty_path(url.path()).to_string(),
        };

        let settings = Settings::resolve(&options, DEFAULT_MIN_TIMEOUT)?;
        let headers = settings.headers().clone();

        Ok(Self {
            target: SocketTarget { scheme, host, port },
            url,
            host_header,
            path,
            version: Version::HTTP_10,
            headers,
            overrides: options,
            settings,
            redirects_left: None,
            handlers: Vec::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> Scheme {
        self.target.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.target.is_tls()
    }

    /// Host as sent in the `Host` header, including the port when the URL names one.
    pub fn host(&self) -> &str {
        &self.host_header
    }

    pub fn port(&self) -> u16 {
        self.target.port
    }

    /// Request target: the URL path (`/` when empty) plus its query.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn socket_target(&self) -> &SocketTarget {
        &self.target
    }

    pub fn method(&self) -> &Method {
        self.settings.method()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Selects HTTP/1.0 or HTTP/1.1; any other version is a configuration error.
    pub fn set_version(&mut self, version: Version) -> Result<&mut Self, Error> {
        ensure!(
            version == Version::HTTP_10 || version == Version::HTTP_11,
            Error::config(format!("unsupported protocol version {version:?}"))
        );
        self.version = version;
        Ok(self)
    }

    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderStore {
        &mut self.headers
    }

    /// The overrides this request was built with.
    pub fn options(&self) -> &Options {
        &self.overrides
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Redirect hops this request may still follow.
    pub fn remaining_redirects(&self) -> u32 {
        self.redirects_left.unwrap_or_else(|| self.settings.max_redirects())
    }

    /// Registers a handler invoked once this request reaches a terminal state.
    ///
    /// Handlers run in registration order. When the request is redirected,
    /// its handlers move to the follow-up request.
    pub fn on_complete<H: CompletionHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Builder form of [`Request::on_complete`].
    pub fn with_handler<H: CompletionHandler + 'static>(mut self, handler: H) -> Self {
        self.on_complete(handler);
        self
    }

    /// Serializes the request line and headers.
    ///
    /// `Host` is always reset to the request host and `Connection` to
    /// `close` before the headers are rendered.
    pub fn to_wire_bytes(&mut self) -> Bytes {
        self.headers.set("Host", self.host_header.clone());
        self.headers.set("Connection", "close");

        let headers = self.headers.serialize();
        let method = self.settings.method().as_str();
        let mut dst = BytesMut::with_capacity(method.len() + self.path.len() + headers.len() + 16);
        dst.put_slice(method.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.path.as_bytes());
        dst.put_slice(b" HTTP/");
        dst.put_slice(version_str(self.version).as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(headers.as_bytes());
        dst.put_slice(b"\r\n");
        dst.freeze()
    }

    /// Re-resolves this request's options on top of a pool's defaults.
    ///
    /// Default headers only fill names the request does not already carry.
    /// Headers set through [`Request::headers_mut`] are checked for CR, LF
    /// and NUL here as well.
    pub(crate) fn apply_defaults(&mut self, defaults: &Options, min_timeout: f64) -> Result<(), Error> {
        let merged = self.overrides.merged_over(defaults);
        let settings = Settings::resolve(&merged, min_timeout)?;
        for (name, value) in settings.headers().iter() {
            self.headers.set_with(name, value, false);
        }
        ensure_sendable(&self.headers)?;
        self.settings = settings;
        Ok(())
    }

    /// Builds the request following a redirect to `target`.
    ///
    /// The follow-up keeps this request's options, version and headers, gets
    /// a `Referer` pointing back here and drops `Host`. Handlers stay where
    /// they are until the pool hands them over with [`Request::take_handlers`].
    pub(crate) fn redirected_to(&self, target: Url, remaining: u32) -> Result<Request, Error> {
        let mut next = Request::from_url(target, self.overrides.clone())?;
        next.version = self.version;
        next.headers = self.headers.clone();
        next.headers.set("Referer", self.url.as_str());
        next.headers.remove("Host");
        next.redirects_left = Some(remaining);
        Ok(next)
    }

    pub(crate) fn take_handlers(&mut self) -> Vec<Box<dyn CompletionHandler>> {
        std::mem::take(&mut self.handlers)
    }

    pub(crate) fn adopt_handlers(&mut self, handlers: Vec<Box<dyn CompletionHandler>>) {
        self.handlers.extend(handlers);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", self.settings.method())
            .field("url", &self.url.as_str())
            .field("target", &self.target)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("settings", &self.settings)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_11 { "1.1" } else { "1.0" }
}

fn non_empty_path(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}
