use std::fmt;
use std::io;
use std::task::Context;

use bytes::{Buf, Bytes};
use tracing::trace;

use crate::connection::{Readiness, Transport};
use crate::protocol::{ParseError, Request, Response, State};

/// Read size once the response head has been parsed.
const BODY_CHUNK_SIZE: usize = 32 * 1024;

/// Stable identifier of a connection within one pool.
///
/// Ids are handed out in attach order and never reused until the pool is
/// reset, so ordering by id is ordering by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a single read produced.
#[derive(Debug)]
pub enum ReadEvent {
    /// The socket had nothing after all
    Spurious,
    /// `len` bytes were fed to the response; `head_parsed` is set on the read
    /// that completed the response head
    Data { len: usize, head_parsed: bool },
    /// The peer closed the stream
    Eof,
    /// The received bytes do not form a valid response
    Malformed(ParseError),
}

/// What a single write produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    /// The whole request has been handed to the socket
    Sent,
    /// Part of the request is still buffered
    Partial { remaining: usize },
    /// Nothing of the request left to send
    Idle,
}

/// One request in flight and everything needed to drive it.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    request: Request,
    response: Response,
    transport: Transport,
    write_buffer: Option<Bytes>,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, request: Request, transport: Transport) -> Self {
        let response = Response::new(&request);
        Self { id, request, response, transport, write_buffer: None }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Reports readiness, asking for write readiness only while the request
    /// or queued TLS records still need the socket.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> io::Result<Readiness> {
        let want_write = self.response.state() == State::Progressing || self.transport.wants_write();
        self.transport.poll_ready(cx, want_write)
    }

    /// Performs one non-blocking read and feeds the bytes to the response.
    ///
    /// Reads `chunk_size` bytes until the response head is parsed and
    /// larger blocks afterwards.
    pub fn read(&mut self) -> io::Result<ReadEvent> {
        let size = if self.response.head_parsed() { BODY_CHUNK_SIZE } else { self.request.settings().chunk_size() };
        let mut buf = vec![0u8; size];

        let n = match self.transport.read(&mut buf) {
            Ok(0) => return Ok(ReadEvent::Eof),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadEvent::Spurious),
            Err(e) => return Err(e),
        };

        trace!(id = %self.id, len = n, "read bytes");
        match self.response.append_chunk(&buf[..n]) {
            Ok(head_parsed) => Ok(ReadEvent::Data { len: n, head_parsed }),
            Err(e) => Ok(ReadEvent::Malformed(e)),
        }
    }

    /// Writes as much of the request as the socket accepts.
    ///
    /// The wire bytes are produced on the first attempt and the unwritten
    /// remainder is kept between calls. Once the request is out, only
    /// pending TLS records are flushed.
    pub fn write(&mut self) -> io::Result<WriteEvent> {
        if self.response.state() != State::Progressing {
            self.transport.flush()?;
            return Ok(WriteEvent::Idle);
        }

        let buffer = self.write_buffer.get_or_insert_with(|| self.request.to_wire_bytes());
        let n = match self.transport.write(buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => return Err(e),
        };
        buffer.advance(n);
        trace!(id = %self.id, len = n, remaining = buffer.len(), "wrote request bytes");

        if buffer.is_empty() {
            self.write_buffer = None;
            Ok(WriteEvent::Sent)
        } else {
            Ok(WriteEvent::Partial { remaining: buffer.len() })
        }
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }
}
