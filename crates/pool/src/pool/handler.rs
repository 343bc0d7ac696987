use crate::pool::Pool;
use crate::protocol::Response;

/// Callback invoked once a request reaches a terminal state.
///
/// Handlers run synchronously on the reactor, in registration order, before
/// the loop moves on to the next ready socket. The pool is handed in mutably
/// so a handler can [`attach`](Pool::attach) follow-up requests; those become
/// visible at the next readiness wait.
///
/// Any `FnMut(&Response, &mut Pool)` closure is a handler:
///
/// ```no_run
/// use micro_http_pool::pool::Pool;
/// use micro_http_pool::protocol::{Request, Response};
///
/// let mut request = Request::new("http://example.com/").unwrap();
/// request.on_complete(|response: &Response, pool: &mut Pool| {
///     if response.is_success() {
///         let _ = pool.attach_url("http://example.com/next", None);
///     }
/// });
/// ```
pub trait CompletionHandler {
    fn on_complete(&mut self, response: &Response, pool: &mut Pool);
}

impl<F> CompletionHandler for F
where
    F: FnMut(&Response, &mut Pool),
{
    fn on_complete(&mut self, response: &Response, pool: &mut Pool) {
        self(response, pool);
    }
}
