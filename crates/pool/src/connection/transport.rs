//! Non-blocking byte transport under a connection: plain TCP or TLS over TCP.
//!
//! Sockets are created synchronously when a request is attached, but the
//! connect itself is a future that only makes progress while the reactor
//! polls it. Once connected, readiness is observed through tokio's
//! `poll_read_ready` / `poll_write_ready` and every read or write is a single
//! non-blocking `try_read` / `try_write` call.
//!
//! TLS is driven by hand with [`rustls::ClientConnection`] over the same
//! socket: ciphertext is pulled with `read_tls`, decrypted with
//! `process_new_packets`, and pending records are pushed out with `write_tls`
//! whenever the socket accepts them.

use std::fmt;
use std::future::Future;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::ClientConnection;
use rustls::pki_types::ServerName;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, trace};

use crate::protocol::{Error, SocketTarget, TlsContext};

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>>>>;

/// Which directions a transport can make progress in right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.readable || self.writable
    }
}

enum Stage {
    Connecting(ConnectFuture),
    Open(TcpStream),
    /// The connect failed; the error is handed out by the next read
    Failed(Option<io::Error>),
    Closed,
}

pub struct Transport {
    stage: Stage,
    tls: Option<Box<ClientConnection>>,
    /// Decrypted bytes may still be waiting inside rustls
    tls_buffered: bool,
}

impl Transport {
    /// Resolves `target` and starts a non-blocking connect to its first address.
    ///
    /// `context` is only consulted for `tls` targets.
    pub fn connect(target: &SocketTarget, context: Option<&TlsContext>) -> Result<Self, Error> {
        let addr = resolve(target)?;
        let socket = if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() };
        let socket = socket.map_err(|e| Error::connection(target, e))?;
        socket.set_nodelay(true).map_err(|e| Error::connection(target, e))?;

        let tls = match (target.is_tls(), context) {
            (true, Some(context)) => Some(Box::new(client_connection(target, context)?)),
            (true, None) => {
                let context = TlsContext::with_webpki_roots()?;
                Some(Box::new(client_connection(target, &context)?))
            }
            (false, _) => None,
        };

        debug!(%target, %addr, tls = tls.is_some(), "connecting");
        Ok(Self { stage: Stage::Connecting(Box::pin(socket.connect(addr))), tls, tls_buffered: false })
    }

    /// Bytes queued inside the TLS session still need the socket.
    pub fn wants_write(&self) -> bool {
        self.tls.as_ref().is_some_and(|tls| tls.wants_write())
    }

    /// Registers interest with `cx` and reports what is ready.
    ///
    /// A failed connect is reported as readable so the following read can
    /// surface the error.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>, want_write: bool) -> io::Result<Readiness> {
        if let Stage::Connecting(connect) = &mut self.stage {
            match connect.as_mut().poll(cx) {
                Poll::Ready(Ok(stream)) => {
                    trace!(peer = ?stream.peer_addr().ok(), "connected");
                    self.stage = Stage::Open(stream);
                }
                Poll::Ready(Err(e)) => {
                    debug!(cause = %e, "connect failed");
                    self.stage = Stage::Failed(Some(e));
                }
                Poll::Pending => return Ok(Readiness::default()),
            }
        }

        let stream = match &self.stage {
            Stage::Open(stream) => stream,
            Stage::Failed(_) => return Ok(Readiness { readable: true, writable: false }),
            Stage::Connecting(_) | Stage::Closed => return Ok(Readiness::default()),
        };

        let mut readiness = Readiness { readable: self.tls_buffered, writable: false };
        if !readiness.readable && let Poll::Ready(result) = stream.poll_read_ready(cx) {
            result?;
            readiness.readable = true;
        }
        if want_write && let Poll::Ready(result) = stream.poll_write_ready(cx) {
            result?;
            readiness.writable = true;
        }
        Ok(readiness)
    }

    /// One non-blocking read. `Ok(0)` is end of stream, `WouldBlock` means
    /// the readiness was spurious.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = open_stream(&mut self.stage)?;
        let Some(tls) = self.tls.as_deref_mut() else {
            return stream.try_read(buf);
        };

        loop {
            match tls.reader().read(buf) {
                Ok(n) => {
                    self.tls_buffered = n == buf.len();
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            self.tls_buffered = false;

            let received = tls.read_tls(&mut SyncIo(stream))?;
            tls.process_new_packets().map_err(io::Error::other)?;
            flush_tls(tls, stream)?;

            if received == 0 {
                // peer closed; hand out whatever rustls still holds, then EOF
                return match tls.reader().read(buf) {
                    Ok(n) => Ok(n),
                    Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof) => Ok(0),
                    Err(e) => Err(e),
                };
            }
        }
    }

    /// One non-blocking write, returning how many bytes of `data` were taken.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let stream = open_stream(&mut self.stage)?;
        let Some(tls) = self.tls.as_deref_mut() else {
            return stream.try_write(data);
        };

        let n = tls.writer().write(data)?;
        flush_tls(tls, stream)?;
        Ok(n)
    }

    /// Pushes queued TLS records to the socket; a no-op for plain TCP.
    pub fn flush(&mut self) -> io::Result<()> {
        let stream = open_stream(&mut self.stage)?;
        match self.tls.as_deref_mut() {
            Some(tls) => flush_tls(tls, stream),
            None => Ok(()),
        }
    }

    pub fn close(&mut self) {
        if let Some(tls) = self.tls.as_deref_mut() {
            tls.send_close_notify();
            if let Stage::Open(stream) = &self.stage {
                let _ = flush_tls(tls, stream);
            }
        }
        self.stage = Stage::Closed;
        self.tls_buffered = false;
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match &self.stage {
            Stage::Connecting(_) => "connecting",
            Stage::Open(_) => "open",
            Stage::Failed(_) => "failed",
            Stage::Closed => "closed",
        };
        f.debug_struct("Transport").field("stage", &stage).field("tls", &self.tls.is_some()).finish()
    }
}

/// Blocking-style `Read`/`Write` view of a non-blocking socket for rustls.
struct SyncIo<'a>(&'a TcpStream);

impl Read for SyncIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for SyncIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn open_stream(stage: &mut Stage) -> io::Result<&TcpStream> {
    match stage {
        Stage::Open(stream) => Ok(stream),
        Stage::Failed(error) => Err(error.take().unwrap_or_else(|| io::ErrorKind::NotConnected.into())),
        Stage::Connecting(_) => Err(io::ErrorKind::WouldBlock.into()),
        Stage::Closed => Err(io::ErrorKind::NotConnected.into()),
    }
}

/// Writes pending TLS records until rustls runs dry or the socket would block.
fn flush_tls(tls: &mut ClientConnection, stream: &TcpStream) -> io::Result<()> {
    while tls.wants_write() {
        match tls.write_tls(&mut SyncIo(stream)) {
            Ok(n) => trace!(len = n, "flushed tls records"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn resolve(target: &SocketTarget) -> Result<SocketAddr, Error> {
    (target.resolvable_host(), target.port())
        .to_socket_addrs()
        .map_err(|e| Error::connection(target, e))?
        .next()
        .ok_or_else(|| Error::connection(target, io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")))
}

fn client_connection(target: &SocketTarget, context: &TlsContext) -> Result<ClientConnection, Error> {
    let server_name = ServerName::try_from(target.resolvable_host().to_string())
        .map_err(|e| Error::connection(target, io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    ClientConnection::new(Arc::clone(context.config()), server_name).map_err(|e| Error::connection(target, io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    #[test]
    fn unresolvable_host_fails_synchronously() {
        let request = Request::new("http://host.invalid/").unwrap();
        let err = Transport::connect(request.socket_target(), None).unwrap_err();
        assert!(matches!(err, Error::Connection { ref target, .. } if target == "tcp://host.invalid:80"));
    }

    #[test]
    fn connect_starts_without_a_runtime() {
        let request = Request::new("http://127.0.0.1:9/").unwrap();
        let mut transport = Transport::connect(request.socket_target(), None).unwrap();
        assert!(!transport.wants_write());

        let mut buf = [0u8; 8];
        let err = transport.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        transport.close();
        assert_eq!(transport.read(&mut buf).unwrap_err().kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn tls_session_queues_client_hello() {
        let request = Request::new("https://127.0.0.1:9/").unwrap();
        let transport = Transport::connect(request.socket_target(), None).unwrap();
        assert!(transport.wants_write());
    }
}
