//! End to end https tests against a local rustls origin.
//!
//! The origin presents a self-signed certificate for `127.0.0.1`, answers
//! every request with a body larger than one TLS record, then sends
//! `close_notify` before closing the socket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use http::StatusCode;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use micro_http_pool::pool::Pool;
use micro_http_pool::protocol::{Options, State, TlsContext};

const BODY_LEN: usize = 40_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn generate_self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string(), "localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    (cert.cert.der().clone(), key.into())
}

fn spawn_tls_origin(cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> SocketAddr {
    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let config = Arc::clone(&config);
            std::thread::spawn(move || serve(stream, config));
        }
    });
    addr
}

fn serve(stream: TcpStream, config: Arc<rustls::ServerConfig>) {
    let connection = rustls::ServerConnection::new(config).unwrap();
    let mut tls = rustls::StreamOwned::new(connection, stream);

    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match tls.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&head);
    let path = head.split_whitespace().nth(1).unwrap_or("/");
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {BODY_LEN}\r\nX-Path: {path}\r\n\r\n").into_bytes();
    response.extend(vec![b's'; BODY_LEN]);
    if tls.write_all(&response).is_err() {
        return;
    }
    tls.conn.send_close_notify();
    let _ = tls.flush();
}

fn trusting(cert: CertificateDer<'static>) -> TlsContext {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert).unwrap();
    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsContext::new(Arc::new(config))
}

#[test]
fn https_requests_complete_through_a_custom_context() {
    init_tracing();
    let (cert, key) = generate_self_signed();
    let addr = spawn_tls_origin(cert.clone(), key);

    let mut pool = Pool::builder().options(Options::new().timeout(10.0).context(trusting(cert))).build().unwrap();
    for i in 0..3 {
        pool.attach_url(&format!("https://{addr}/secure/{i}"), None).unwrap();
    }
    let responses = pool.run().unwrap();

    assert_eq!(responses.len(), 3);
    for (i, response) in responses.values().enumerate() {
        assert_eq!(response.state(), State::Completed);
        assert!(!response.is_error(), "{:?}", response.message());
        assert_eq!(response.status(), Some(StatusCode::OK));
        assert_eq!(response.headers().get("x-path"), Some(format!("/secure/{i}").as_str()));

        let body = response.content().unwrap();
        assert_eq!(body.len(), BODY_LEN);
        assert!(body.iter().all(|&b| b == b's'));
    }
}

#[test]
fn untrusted_certificate_fails_the_connection() {
    init_tracing();
    let (cert, key) = generate_self_signed();
    let addr = spawn_tls_origin(cert, key);

    // the default context only trusts the public web roots
    let mut pool = Pool::builder().options(Options::new().timeout(10.0)).build().unwrap();
    pool.attach_url(&format!("https://{addr}/secure"), None).unwrap();
    let responses = pool.run().unwrap();

    let response = responses.values().next().unwrap();
    assert_eq!(response.state(), State::ConnectionFailed);
    assert!(response.is_error());
    assert!(response.message().is_some_and(|m| m.starts_with("read failed")), "{:?}", response.message());
    assert!(response.status().is_none());
}
