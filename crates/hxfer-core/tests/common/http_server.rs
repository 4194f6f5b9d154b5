//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves a single static body for GET (with Range support) and records every
//! request, including POST bodies. Options force a status code, ignore ranges
//! or throttle the body so a transfer can be cancelled mid-stream. Every
//! response is sent with `Connection: close`.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Answer every request with this status (and a short text body).
    pub force_status: Option<u16>,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Send the GET body in `chunk` sized pieces with this pause in between.
    pub throttle: Option<(usize, Duration)>,
    /// Body returned for POST requests.
    pub post_response: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            force_status: None,
            support_ranges: true,
            throttle: None,
            post_response: "{\"ok\":true}".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct TestServer {
    /// Base URL, e.g. "http://127.0.0.1:12345/".
    pub url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl TestServer {
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url, path.trim_start_matches('/'))
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

/// Starts a server in a background thread serving `body`. The server runs until the process exits.
pub fn start(body: Vec<u8>) -> TestServer {
    start_with_options(body, ServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: ServerOptions) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    {
        let hits = Arc::clone(&hits);
        let requests = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let body = Arc::clone(&body);
                let opts = Arc::clone(&opts);
                let hits = Arc::clone(&hits);
                let requests = Arc::clone(&requests);
                thread::spawn(move || {
                    if let Some(req) = read_request(&stream) {
                        hits.fetch_add(1, Ordering::SeqCst);
                        requests.lock().unwrap().push(req.clone());
                        respond(stream, &req, &body, &opts);
                    }
                });
            }
        });
    }
    TestServer {
        url: format!("http://127.0.0.1:{}/", port),
        hits,
        requests,
    }
}

fn read_request(mut stream: &TcpStream) -> Option<Captured> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    let head_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&data[..head_end]).ok()?;
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next().unwrap_or("/").to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();
    let mut captured = Captured {
        method,
        path,
        headers,
        body: data[head_end..].to_vec(),
    };
    let content_length = captured
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if captured
        .header("expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        let _ = stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n");
    }
    while captured.body.len() < content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        captured.body.extend_from_slice(&buf[..n]);
    }
    Some(captured)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn write_head(stream: &mut TcpStream, status: &str, len: usize, extra: &str) -> bool {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        status, len, extra
    );
    stream.write_all(head.as_bytes()).is_ok()
}

fn respond(mut stream: TcpStream, req: &Captured, body: &[u8], opts: &ServerOptions) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    if let Some(code) = opts.force_status {
        let text = format!("status {}", code);
        if write_head(&mut stream, &format!("{} Forced", code), text.len(), "") {
            let _ = stream.write_all(text.as_bytes());
        }
        return;
    }
    match req.method.as_str() {
        "POST" => {
            let text = opts.post_response.as_bytes();
            if write_head(&mut stream, "200 OK", text.len(), "Content-Type: application/json\r\n") {
                let _ = stream.write_all(text);
            }
        }
        "GET" => {
            let total = body.len() as u64;
            let range = if opts.support_ranges {
                req.header("range").and_then(parse_range)
            } else {
                None
            };
            let (status, extra, slice) = match range {
                Some(start) if start >= total => {
                    ("416 Range Not Satisfiable", format!("Content-Range: bytes */{}\r\n", total), &body[0..0])
                }
                Some(start) => (
                    "206 Partial Content",
                    format!("Content-Range: bytes {}-{}/{}\r\n", start, total - 1, total),
                    &body[start as usize..],
                ),
                None => ("200 OK", String::new(), body),
            };
            if !write_head(&mut stream, status, slice.len(), &extra) {
                return;
            }
            match opts.throttle {
                Some((chunk, pause)) => {
                    for piece in slice.chunks(chunk.max(1)) {
                        if stream.write_all(piece).is_err() || stream.flush().is_err() {
                            return;
                        }
                        thread::sleep(pause);
                    }
                }
                None => {
                    let _ = stream.write_all(slice);
                }
            }
        }
        _ => {
            let _ = write_head(&mut stream, "405 Method Not Allowed", 0, "");
        }
    }
}

/// Start offset of an open-ended `bytes=N-` range.
fn parse_range(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
