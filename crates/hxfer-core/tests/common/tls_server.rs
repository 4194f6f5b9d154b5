//! HTTPS server with a freshly generated self-signed certificate.
//!
//! Answers every request with `200` and a fixed body. Handshakes the client
//! rejects simply end the connection.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

/// A self-signed certificate for `localhost` and `127.0.0.1`.
pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl SelfSigned {
    pub fn generate(common_name: &str) -> Self {
        let key_pair = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        let cert = params.self_signed(&key_pair).unwrap();
        Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: key_pair.serialize_der(),
        }
    }

    fn server_config(&self) -> ServerConfig {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], key)
            .unwrap()
    }
}

pub struct TlsServer {
    /// Base URL, e.g. "https://127.0.0.1:12345/".
    pub url: String,
    pub identity: SelfSigned,
    served: Arc<AtomicUsize>,
}

impl TlsServer {
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url, path.trim_start_matches('/'))
    }

    /// Requests answered after a completed handshake.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread serving `body`. The server runs until the process exits.
pub fn start(body: Vec<u8>) -> TlsServer {
    let identity = SelfSigned::generate("hxfer test server");
    let config = Arc::new(identity.server_config());
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let served = Arc::new(AtomicUsize::new(0));
    {
        let served = Arc::clone(&served);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let config = Arc::clone(&config);
                let body = Arc::clone(&body);
                let served = Arc::clone(&served);
                thread::spawn(move || {
                    if serve(stream, config, &body).is_some() {
                        served.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
    }
    TlsServer {
        url: format!("https://127.0.0.1:{}/", port),
        identity,
        served,
    }
}

fn serve(tcp: TcpStream, config: Arc<ServerConfig>, body: &[u8]) -> Option<()> {
    let _ = tcp.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
    let conn = ServerConnection::new(config).ok()?;
    let mut tls = StreamOwned::new(conn, tcp);
    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tls.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    tls.write_all(response.as_bytes()).ok()?;
    tls.write_all(body).ok()?;
    tls.conn.send_close_notify();
    tls.flush().ok()?;
    Some(())
}
