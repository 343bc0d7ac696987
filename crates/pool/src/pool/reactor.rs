use std::collections::BTreeMap;
use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;

use http::StatusCode;
use tracing::{debug, info, trace, warn};

use crate::connection::{ClientConnection, ConnectionId, ReadEvent, Readiness, Transport, WriteEvent};
use crate::pool::redirect::resolve_redirect;
use crate::protocol::options::DEFAULT_MIN_TIMEOUT;
use crate::protocol::{Error, OptionKey, OptionValue, Options, Request, Response, Settings, State, TlsContext};
use crate::ensure;

/// Drives many requests to completion on a single thread.
///
/// Requests are [`attach`](Pool::attach)ed first, then [`run`](Pool::run)
/// multiplexes every open socket until each one reaches a terminal state,
/// including the redirects and handler attachments spawned along the way.
#[derive(Debug)]
pub struct Pool {
    defaults: Options,
    default_settings: Settings,
    min_timeout: f64,
    max_timeout: f64,
    next_id: u64,
    connections: BTreeMap<ConnectionId, ClientConnection>,
    finished: BTreeMap<ConnectionId, Response>,
    default_tls: Option<TlsContext>,
    running: bool,
}

/// Pause between loop iterations while sockets remain open.
const LOOP_PAUSE: Duration = Duration::from_millis(1);

/// Configures the defaults of a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    min_timeout: f64,
    options: Options,
}

impl PoolBuilder {
    /// Floor applied to every request timeout, in seconds.
    pub fn min_timeout(mut self, seconds: f64) -> Self {
        self.min_timeout = seconds;
        self
    }

    /// Options every attached request falls back to.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Validates the defaults and builds the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the minimum timeout is negative or not
    /// finite, or when the default options do not validate.
    pub fn build(self) -> Result<Pool, Error> {
        ensure!(
            self.min_timeout.is_finite() && self.min_timeout >= 0.0,
            Error::config(format!("min_timeout must be a non-negative number of seconds, got {}", self.min_timeout))
        );
        let default_settings = Settings::resolve(&self.options, self.min_timeout)?;
        Ok(Pool {
            defaults: self.options,
            default_settings,
            min_timeout: self.min_timeout,
            max_timeout: 0.0,
            next_id: 0,
            connections: BTreeMap::new(),
            finished: BTreeMap::new(),
            default_tls: None,
            running: false,
        })
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self { min_timeout: DEFAULT_MIN_TIMEOUT, options: Options::new() }
    }
}

impl Pool {
    /// A pool with the crate defaults.
    pub fn new() -> Self {
        Self {
            defaults: Options::new(),
            default_settings: Settings::default(),
            min_timeout: DEFAULT_MIN_TIMEOUT,
            max_timeout: 0.0,
            next_id: 0,
            connections: BTreeMap::new(),
            finished: BTreeMap::new(),
            default_tls: None,
            running: false,
        }
    }

    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// The validated pool defaults.
    pub fn default_options(&self) -> &Settings {
        &self.default_settings
    }

    pub fn default_option(&self, key: OptionKey) -> OptionValue<'_> {
        self.default_settings.get(key)
    }

    /// The readiness wait bound: the largest timeout among attached requests.
    pub fn max_timeout(&self) -> f64 {
        self.max_timeout
    }

    pub fn min_timeout(&self) -> f64 {
        self.min_timeout
    }

    /// Connections still waiting to reach a terminal state.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Responses that already reached a terminal state during the current run.
    pub fn responses(&self) -> &BTreeMap<ConnectionId, Response> {
        &self.finished
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty() && self.finished.is_empty()
    }

    /// Merges the pool defaults into `request` and opens its socket.
    ///
    /// The connect completes inside [`Pool::run`]; name resolution and socket
    /// creation happen here, so their failures surface immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the merged options do not validate
    /// - [`Error::Connection`] when the socket cannot be opened
    pub fn attach(&mut self, mut request: Request) -> Result<&mut Self, Error> {
        let transport = self.open(&mut request)?;
        self.register(request, transport);
        Ok(self)
    }

    /// Builds a request for `url` and attaches it.
    pub fn attach_url(&mut self, url: &str, options: Option<Options>) -> Result<&mut Self, Error> {
        let request = Request::with_options(url, options.unwrap_or_default())?;
        self.attach(request)
    }

    fn open(&mut self, request: &mut Request) -> Result<Transport, Error> {
        request.apply_defaults(&self.defaults, self.min_timeout)?;

        let context = match request.settings().context() {
            Some(context) => Some(context.clone()),
            None if request.is_secure() => Some(self.default_tls_context()?),
            None => None,
        };
        Transport::connect(request.socket_target(), context.as_ref())
    }

    fn default_tls_context(&mut self) -> Result<TlsContext, Error> {
        if let Some(context) = &self.default_tls {
            return Ok(context.clone());
        }
        let context = TlsContext::with_webpki_roots()?;
        self.default_tls = Some(context.clone());
        Ok(context)
    }

    fn register(&mut self, request: Request, transport: Transport) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        self.max_timeout = self.max_timeout.max(request.settings().timeout());

        debug!(%id, method = %request.method(), url = %request.url(), target = %request.socket_target(), "attached request");
        self.connections.insert(id, ClientConnection::new(id, request, transport));
        id
    }

    /// Drives every attached request to a terminal state.
    ///
    /// Each iteration snapshots the open connections, waits for readiness
    /// bounded by [`Pool::max_timeout`], performs the ready reads in
    /// registration order and then the ready writes. Connections attached by
    /// redirects or handlers join at the next snapshot. When the wait times
    /// out, every open connection is closed as [`State::TimedOut`] without
    /// invoking its handlers.
    ///
    /// Returns the responses of every connection that finished during this
    /// run, keyed by connection id.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPool`] when nothing is attached
    /// - [`Error::AlreadyRunning`] when called from a completion handler
    ///   while this pool is running
    /// - [`Error::RedirectResolution`] when a redirect points nowhere usable;
    ///   all in-flight and finished work of the run is dropped
    /// - [`Error::Reactor`] when the readiness wait itself fails
    pub fn run(&mut self) -> Result<BTreeMap<ConnectionId, Response>, Error> {
        ensure!(!self.running, Error::AlreadyRunning);
        ensure!(!self.connections.is_empty(), Error::EmptyPool);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_io().enable_time().build().map_err(Error::reactor)?;

        info!(connections = self.connections.len(), timeout = self.max_timeout, "running pool");
        self.running = true;
        let outcome = runtime.block_on(self.drive());
        self.running = false;

        match outcome {
            Ok(()) => Ok(std::mem::take(&mut self.finished)),
            Err(e) => {
                warn!(cause = %e, "pool run aborted");
                self.connections.clear();
                self.finished.clear();
                Err(e)
            }
        }
    }

    /// Clears every connection and response and restarts id numbering.
    pub fn reset(&mut self) {
        self.connections.clear();
        self.finished.clear();
        self.next_id = 0;
        self.max_timeout = 0.0;
    }

    async fn drive(&mut self) -> Result<(), Error> {
        while !self.connections.is_empty() {
            let snapshot: Vec<ConnectionId> = self.connections.keys().copied().collect();
            let wait = Duration::try_from_secs_f64(self.max_timeout).unwrap_or(Duration::MAX);

            let ready = match tokio::time::timeout(wait, self.wait_ready(&snapshot)).await {
                Ok(ready) => ready?,
                Err(_) => {
                    self.expire();
                    break;
                }
            };
            trace!(open = snapshot.len(), ready = ready.len(), "readiness wait returned");

            for (id, _) in ready.iter().filter(|(_, readiness)| readiness.readable) {
                self.read_ready(*id)?;
            }
            for (id, _) in ready.iter().filter(|(_, readiness)| readiness.writable) {
                self.write_ready(*id);
            }

            if !self.connections.is_empty() {
                tokio::time::sleep(LOOP_PAUSE).await;
            }
        }
        Ok(())
    }

    /// Resolves once at least one connection of `snapshot` can make progress.
    async fn wait_ready(&mut self, snapshot: &[ConnectionId]) -> Result<Vec<(ConnectionId, Readiness)>, Error> {
        poll_fn(|cx| -> Poll<Result<Vec<(ConnectionId, Readiness)>, Error>> {
            let mut ready = Vec::new();
            for id in snapshot {
                let Some(connection) = self.connections.get_mut(id) else {
                    continue;
                };
                let readiness = connection.poll_ready(cx).map_err(Error::reactor)?;
                if readiness.is_ready() {
                    ready.push((*id, readiness));
                }
            }

            if ready.is_empty() { Poll::Pending } else { Poll::Ready(Ok(ready)) }
        })
        .await
    }

    fn read_ready(&mut self, id: ConnectionId) -> Result<(), Error> {
        let Some(connection) = self.connections.get_mut(&id) else {
            return Ok(());
        };

        match connection.read() {
            Ok(ReadEvent::Spurious) => Ok(()),
            Ok(ReadEvent::Data { len, head_parsed }) => {
                trace!(%id, len, "received response bytes");
                if head_parsed && let Some(code) = connection.response().redirect_status() {
                    return self.follow_redirect(id, code);
                }
                connection.response_mut().set_state(State::Reading);
                Ok(())
            }
            Ok(ReadEvent::Eof) => {
                let response = connection.response_mut();
                let state = if response.state() == State::Progressing && response.bytes_received() == 0 {
                    response.set_error("connection closed before the request was sent");
                    State::ConnectionFailed
                } else {
                    if response.bytes_received() == 0 {
                        response.set_error("connection closed before a response arrived");
                    } else if !response.head_parsed() {
                        response.set_error("connection closed before the response head was complete");
                    }
                    State::Completed
                };
                trace!(%id, %state, received = response.bytes_received(), "peer closed the connection");
                self.finish(id, state);
                Ok(())
            }
            Ok(ReadEvent::Malformed(e)) => {
                warn!(%id, cause = %e, "malformed response");
                connection.response_mut().fail(Error::from(e));
                self.finish(id, State::ConnectionFailed);
                Ok(())
            }
            Err(e) => {
                warn!(%id, cause = %e, "read failed");
                connection.response_mut().set_error(format!("read failed: {e}"));
                self.finish(id, State::ConnectionFailed);
                Ok(())
            }
        }
    }

    fn write_ready(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };

        match connection.write() {
            Ok(WriteEvent::Sent) => {
                trace!(%id, "request sent");
                connection.response_mut().set_state(State::WaitingForResponse);
            }
            Ok(WriteEvent::Partial { remaining }) => trace!(%id, remaining, "request partially sent"),
            Ok(WriteEvent::Idle) => {}
            Err(e) => {
                warn!(%id, cause = %e, "write failed");
                connection.response_mut().set_error(format!("write failed: {e}"));
                self.finish(id, State::ConnectionFailed);
            }
        }
    }

    /// Follows the redirect carried by connection `id` and completes it.
    ///
    /// The follow-up request is attached to this pool and joins the next
    /// readiness snapshot; the completion handlers move over to it.
    fn follow_redirect(&mut self, id: ConnectionId, code: StatusCode) -> Result<(), Error> {
        let Some(connection) = self.connections.get_mut(&id) else {
            return Ok(());
        };

        let response = connection.response();
        let location = response.headers().get("location").unwrap_or_default();
        let Some(target) = resolve_redirect(response.url(), location) else {
            return Err(Error::redirect_resolution(location, response.url()));
        };

        let remaining = response.remaining_redirects();
        if remaining == 0 {
            debug!(%id, %target, "redirects exhausted");
            connection.response_mut().set_error("redirects exhausted");
            self.finish(id, State::Completed);
            return Ok(());
        }

        debug!(%id, code = code.as_u16(), %target, remaining, "following redirect");
        connection.response_mut().record_redirect(target.clone(), code);

        let follow_up = connection.request().redirected_to(target, remaining - 1);
        let opened = follow_up.and_then(|mut next| self.open(&mut next).map(|transport| (next, transport)));
        match opened {
            Ok((mut next, transport)) => {
                if let Some(connection) = self.connections.get_mut(&id) {
                    next.adopt_handlers(connection.request_mut().take_handlers());
                }
                self.register(next, transport);
            }
            Err(e) => {
                warn!(%id, cause = %e, "unable to attach the redirect target");
                if let Some(connection) = self.connections.get_mut(&id) {
                    connection.response_mut().fail(e);
                }
            }
        }

        self.finish(id, State::Completed);
        Ok(())
    }

    /// Closes connection `id`, settles it in `state`, runs its handlers and
    /// files the response.
    fn finish(&mut self, id: ConnectionId, state: State) {
        let Some(mut connection) = self.connections.remove(&id) else {
            return;
        };
        connection.close();

        let (mut request, mut response) = connection.into_parts();
        response.set_state(state);
        debug!(%id, state = %response.state(), status = ?response.status(), error = response.is_error(), "request finished");

        for mut handler in request.take_handlers() {
            handler.on_complete(&response, self);
        }
        self.finished.insert(id, response);
    }

    /// Gives up on every open connection after a readiness timeout.
    fn expire(&mut self) {
        warn!(open = self.connections.len(), timeout = self.max_timeout, "readiness wait timed out");
        for (id, mut connection) in std::mem::take(&mut self.connections) {
            connection.close();
            let (_, mut response) = connection.into_parts();
            response.set_state(State::TimedOut);
            response.set_error("timed out");
            self.finished.insert(id, response);
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}
