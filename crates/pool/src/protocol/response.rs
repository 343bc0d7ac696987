//! Incremental response decoding and classification.
//!
//! A [`Response`] is fed raw bytes with [`Response::append_chunk`] as they
//! arrive from the socket. Bytes are buffered until the first head/body
//! separator (`\r\n\r\n`, `\n\n` or `\r\r`) shows up; at that point the
//! status line and header block are parsed exactly once and everything after
//! the separator becomes the start of the content. Later chunks go straight
//! to the content buffer.
//!
//! Transfer and content codings are not applied while reading. They are
//! undone on demand by [`Response::content`], chunked framing first and the
//! content coding second.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode, Version};
use tracing::trace;
use url::Url;

use crate::codec::{ChunkedDecoder, decode_content};
use crate::protocol::request::version_str;
use crate::protocol::{Error, HeaderStore, ParseError, Request};

/// Largest response head accepted before the separator is found.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Lifecycle of a single request/response exchange.
///
/// States are ordered; a response only ever moves forward and stays put once
/// it reaches one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Socket opened, request not fully written yet
    Progressing,
    /// Request written, nothing read yet
    WaitingForResponse,
    /// Response bytes are arriving
    Reading,
    Completed,
    ConnectionFailed,
    TimedOut,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::ConnectionFailed | State::TimedOut)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Progressing => "progressing",
            State::WaitingForResponse => "waiting for response",
            State::Reading => "reading",
            State::Completed => "completed",
            State::ConnectionFailed => "connection failed",
            State::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// The response to one [`Request`], built up as bytes arrive.
#[derive(Debug, Clone)]
pub struct Response {
    url: Url,
    method: Method,
    state: State,
    version: Option<Version>,
    status: Option<StatusCode>,
    reason: String,
    headers: HeaderStore,
    head_parsed: bool,
    head_buffer: BytesMut,
    content: BytesMut,
    bytes_received: usize,
    redirect_uri: Option<Url>,
    redirect_code: Option<StatusCode>,
    remaining_redirects: u32,
    error: bool,
    message: Option<String>,
    failure: Option<Arc<Error>>,
}

impl Response {
    pub fn new(request: &Request) -> Self {
        Self {
            url: request.url().clone(),
            method: request.method().clone(),
            state: State::Progressing,
            version: None,
            status: None,
            reason: String::new(),
            headers: HeaderStore::new(),
            head_parsed: false,
            head_buffer: BytesMut::new(),
            content: BytesMut::new(),
            bytes_received: 0,
            redirect_uri: None,
            redirect_code: None,
            remaining_redirects: request.remaining_redirects(),
            error: false,
            message: None,
            failure: None,
        }
    }

    /// URL of the request this response answers.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves to `state` unless that would go backwards or leave a terminal state.
    ///
    /// Returns whether the state changed.
    pub fn set_state(&mut self, state: State) -> bool {
        if self.state.is_terminal() || state <= self.state {
            return false;
        }
        trace!(url = %self.url, from = %self.state, to = %state, "response state changed");
        self.state = state;
        true
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderStore {
        &self.headers
    }

    pub fn head_parsed(&self) -> bool {
        self.head_parsed
    }

    /// Total bytes handed to [`Response::append_chunk`].
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// Feeds bytes read from the socket.
    ///
    /// Returns `Ok(true)` when this chunk completed the response head.
    ///
    /// # Errors
    ///
    /// Fails with [`ParseError::StatusLine`] or
    /// [`ParseError::MalformedHeader`] when the head does not parse, and with
    /// [`ParseError::TooLargeHead`] when no separator shows up within
    /// [`MAX_HEAD_SIZE`] bytes.
    pub fn append_chunk(&mut self, chunk: &[u8]) -> Result<bool, ParseError> {
        self.bytes_received += chunk.len();

        if self.head_parsed {
            self.content.extend_from_slice(chunk);
            return Ok(false);
        }

        self.head_buffer.extend_from_slice(chunk);
        let Some((head_end, body_start)) = find_separator(&self.head_buffer) else {
            let size = self.head_buffer.len();
            if size > MAX_HEAD_SIZE {
                return Err(ParseError::too_large_head(size, MAX_HEAD_SIZE));
            }
            return Ok(false);
        };

        let mut buffer = std::mem::take(&mut self.head_buffer);
        let body = buffer.split_off(body_start);
        buffer.truncate(head_end);

        self.parse_head(&buffer)?;
        self.content = body;
        self.head_parsed = true;
        trace!(url = %self.url, status = ?self.status, head_len = head_end, "parsed response head");
        Ok(true)
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<(), ParseError> {
        let head = String::from_utf8_lossy(head);
        let (status_line, block) = match head.find(['\r', '\n']) {
            Some(index) => {
                let skip = if head[index..].starts_with("\r\n") { 2 } else { 1 };
                (&head[..index], &head[index + skip..])
            }
            None => (&*head, ""),
        };

        let (version, status, reason) = parse_status_line(status_line)?;
        let headers = HeaderStore::from_block(block)?;

        self.version = Some(version);
        self.status = Some(status);
        self.reason = reason;
        self.headers = headers;
        Ok(())
    }

    pub fn is_informational(&self) -> bool {
        self.status.is_some_and(|s| s.is_informational())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| s.is_success())
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_some_and(|s| s.is_redirection())
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_some_and(|s| s.is_client_error())
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_some_and(|s| s.is_server_error())
    }

    /// The status code when it is one of the redirects this client follows:
    /// 301, 302 or 307.
    pub fn redirect_status(&self) -> Option<StatusCode> {
        self.status.filter(|s| {
            matches!(*s, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::TEMPORARY_REDIRECT)
        })
    }

    /// Content bytes exactly as received, codings still applied.
    pub fn raw_content(&self) -> &[u8] {
        &self.content
    }

    /// Content with the chunked transfer coding and any gzip/deflate content
    /// coding removed.
    pub fn content(&self) -> Result<Bytes, ParseError> {
        let body = if self.is_chunked() {
            ChunkedDecoder::decode_all(&self.content)?
        } else {
            Bytes::copy_from_slice(&self.content)
        };

        match self.headers.get("content-encoding") {
            Some(coding) => decode_content(coding, &body),
            None => Ok(body),
        }
    }

    fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .and_then(|te| te.rsplit(',').next())
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Where the redirect carried by this response pointed, once followed.
    pub fn redirect_uri(&self) -> Option<&Url> {
        self.redirect_uri.as_ref()
    }

    pub fn redirect_code(&self) -> Option<StatusCode> {
        self.redirect_code
    }

    pub fn remaining_redirects(&self) -> u32 {
        self.remaining_redirects
    }

    pub(crate) fn record_redirect(&mut self, target: Url, code: StatusCode) {
        self.redirect_uri = Some(target);
        self.redirect_code = Some(code);
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The typed error behind [`Response::message`], when one caused the failure.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_deref()
    }

    /// Flags the response as failed. The first recorded message is kept.
    pub fn set_error<S: ToString>(&mut self, message: S) {
        self.error = true;
        if self.message.is_none() {
            self.message = Some(message.to_string());
        }
    }

    pub(crate) fn fail(&mut self, error: Error) {
        self.set_error(&error);
        if self.failure.is_none() {
            self.failure = Some(Arc::new(error));
        }
    }
}

/// Reconstructs the wire form; empty until the head has been parsed.
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (Some(version), Some(status)) = (self.version, self.status) else {
            return Ok(());
        };
        write!(f, "HTTP/{} {} {}\r\n", version_str(version), status.as_u16(), self.reason)?;
        f.write_str(&self.headers.serialize())?;
        f.write_str("\r\n")?;
        f.write_str(&String::from_utf8_lossy(&self.content))
    }
}

/// Finds the leftmost head/body separator, returning where the head ends and
/// where the body starts.
fn find_separator(buf: &[u8]) -> Option<(usize, usize)> {
    const SEPARATORS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];

    SEPARATORS
        .iter()
        .filter_map(|sep| buf.windows(sep.len()).position(|w| w == *sep).map(|at| (at, at + sep.len())))
        .min_by_key(|(at, _)| *at)
}

/// Parses `HTTP/<1.0|1.1> <3 digit code>[ <reason>]`.
fn parse_status_line(line: &str) -> Result<(Version, StatusCode, String), ParseError> {
    let invalid = || ParseError::status_line(line);

    let rest = line.strip_prefix("HTTP/").ok_or_else(invalid)?;
    let (version, rest) = rest.split_once(' ').ok_or_else(invalid)?;
    let version = match version {
        "1.0" => Version::HTTP_10,
        "1.1" => Version::HTTP_11,
        _ => return Err(invalid()),
    };

    let (code, reason) = match rest.split_once(' ') {
        Some((code, reason)) => (code, reason.trim()),
        None => (rest, ""),
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let status = StatusCode::from_bytes(code.as_bytes()).ok().ok_or_else(invalid)?;

    let reason = if reason.is_empty() { status.canonical_reason().unwrap_or_default() } else { reason };
    Ok((version, status, reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use indoc::indoc;
    use std::io::Write;

    fn response() -> Response {
        Response::new(&Request::new("http://example.com/index.html").unwrap())
    }

    #[test]
    fn parses_head_split_across_chunks() {
        let mut response = response();

        assert!(!response.append_chunk(b"HTTP/1.1 200 OK\r\nContent-Ty").unwrap());
        assert!(!response.head_parsed());
        assert!(response.append_chunk(b"pe: text/plain\r\nContent-Length: 5\r\n\r\nhel").unwrap());
        assert!(!response.append_chunk(b"lo").unwrap());

        assert_eq!(response.version(), Some(Version::HTTP_11));
        assert_eq!(response.status(), Some(StatusCode::OK));
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
        assert_eq!(response.raw_content(), b"hello");
        assert_eq!(response.bytes_received(), 69);
        assert!(response.is_success());
    }

    #[test]
    fn accepts_bare_lf_and_cr_separators() {
        let mut response = response();
        response.append_chunk(b"HTTP/1.0 404 Not Found\nServer: x\n\nmissing").unwrap();
        assert_eq!(response.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(response.headers().get("server"), Some("x"));
        assert_eq!(response.raw_content(), b"missing");
        assert!(response.is_client_error());

        let mut response = self::response();
        response.append_chunk(b"HTTP/1.0 503 Busy\rRetry-After: 1\r\rlater").unwrap();
        assert_eq!(response.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(response.reason(), "Busy");
        assert_eq!(response.raw_content(), b"later");
        assert!(response.is_server_error());
    }

    #[test]
    fn leftmost_separator_wins() {
        let mut response = response();
        response.append_chunk(b"HTTP/1.1 200 OK\n\nbody\r\n\r\nmore").unwrap();
        assert!(response.headers().is_empty());
        assert_eq!(response.raw_content(), b"body\r\n\r\nmore");
    }

    #[test]
    fn missing_reason_uses_canonical_phrase() {
        let mut response = response();
        response.append_chunk(b"HTTP/1.1 204\r\n\r\n").unwrap();
        assert_eq!(response.reason(), "No Content");
    }

    #[test]
    fn rejects_malformed_status_lines() {
        for head in [
            &b"ICY 200 OK\r\n\r\n"[..],
            b"HTTP/2 200 OK\r\n\r\n",
            b"HTTP/1.1 20 OK\r\n\r\n",
            b"HTTP/1.1 abc OK\r\n\r\n",
            b"<html>\n\n",
        ] {
            let err = response().append_chunk(head).unwrap_err();
            assert!(matches!(err, ParseError::StatusLine { .. }), "{err}");
        }
    }

    #[test]
    fn rejects_malformed_header_block() {
        let err = response().append_chunk(b"HTTP/1.1 200 OK\r\nnonsense\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn rejects_unbounded_head() {
        let mut response = response();
        response.append_chunk(b"HTTP/1.1 200 OK\r\n").unwrap();
        let filler = vec![b'a'; MAX_HEAD_SIZE];
        let err = response.append_chunk(&filler).unwrap_err();
        assert!(matches!(err, ParseError::TooLargeHead { .. }));
    }

    #[test]
    fn redirect_classification() {
        for (code, followed) in [(301, true), (302, true), (307, true), (303, false), (308, false), (300, false)] {
            let mut response = response();
            response.append_chunk(format!("HTTP/1.1 {code} X\r\n\r\n").as_bytes()).unwrap();
            assert!(response.is_redirect());
            assert_eq!(response.redirect_status().is_some(), followed, "{code}");
        }

        let mut response = response();
        response.append_chunk(b"HTTP/1.1 100 Continue\r\n\r\n").unwrap();
        assert!(response.is_informational());
        assert!(!response.is_redirect());
    }

    #[test]
    fn decodes_chunked_content() {
        let str = indoc! {"
            HTTP/1.1 200 OK\r
            Transfer-Encoding: chunked\r
            \r
            4\r
            Wiki\r
            0\r
            \r
        "};

        let mut response = response();
        response.append_chunk(str.as_bytes()).unwrap();
        assert_eq!(response.content().unwrap(), Bytes::from_static(b"Wiki"));
        assert_eq!(response.raw_content(), b"4\r\nWiki\r\n0\r\n\r\n");
    }

    #[test]
    fn invalid_chunk_framing_surfaces_on_content() {
        let mut response = response();
        response.append_chunk(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nWiki\r\n0\r\n\r\n").unwrap();
        assert!(matches!(response.content(), Err(ParseError::InvalidChunk { .. })));
    }

    #[test]
    fn decodes_chunked_gzip_content() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let gz = encoder.finish().unwrap();

        let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n".to_vec();
        wire.extend(format!("{:x}\r\n", gz.len()).as_bytes());
        wire.extend(&gz);
        wire.extend(b"\r\n0\r\n\r\n");

        let mut response = response();
        for piece in wire.chunks(7) {
            response.append_chunk(piece).unwrap();
        }
        assert_eq!(response.content().unwrap(), Bytes::from_static(b"compressed payload"));
    }

    #[test]
    fn identity_content_is_returned_unchanged() {
        let mut response = response();
        response.append_chunk(b"HTTP/1.0 200 OK\r\nContent-Encoding: br\r\n\r\nopaque").unwrap();
        assert_eq!(response.content().unwrap(), Bytes::from_static(b"opaque"));
    }

    #[test]
    fn state_never_regresses() {
        let mut response = response();
        assert_eq!(response.state(), State::Progressing);
        assert!(response.set_state(State::Reading));
        assert!(!response.set_state(State::WaitingForResponse));
        assert_eq!(response.state(), State::Reading);

        assert!(response.set_state(State::Completed));
        assert!(!response.set_state(State::TimedOut));
        assert_eq!(response.state(), State::Completed);
        assert!(response.is_terminal());
    }

    #[test]
    fn first_error_message_is_kept() {
        let mut response = response();
        response.set_error("redirects exhausted");
        response.set_error("something else");
        assert!(response.is_error());
        assert_eq!(response.message(), Some("redirects exhausted"));
        assert!(response.failure().is_none());

        let mut response = self::response();
        response.fail(Error::from(ParseError::status_line("ICY 200 OK")));
        assert!(response.is_error());
        assert!(response.failure().is_some_and(Error::is_protocol));
        assert_eq!(response.message(), Some("protocol error: malformed status line: \"ICY 200 OK\""));
    }

    #[test]
    fn display_reconstructs_the_wire_form() {
        let mut response = response();
        assert_eq!(response.to_string(), "");

        response.append_chunk(b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n\r\nhi").unwrap();
        assert_eq!(response.to_string(), "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhi");
    }
}
