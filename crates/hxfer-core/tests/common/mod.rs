#![allow(dead_code)]

pub mod http_server;
pub mod tls_server;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hxfer_core::error::{ErrorKind, TransferError};
use hxfer_core::{DownloadListener, OutcomeRecord, OutcomeSink, UploadListener};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start(String),
    Progress(u64, Option<u64>),
    Complete(String, String),
    Error(ErrorKind, String, String),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete(..) | Event::Error(..))
    }
}

/// Listener that records every callback and signals terminal ones.
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    terminal: Mutex<Sender<Event>>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                terminal: Mutex::new(tx),
            }),
            rx,
        )
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<(u64, Option<u64>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(d, t) => Some((d, t)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        if event.is_terminal() {
            let _ = self.terminal.lock().unwrap().send(event.clone());
        }
        self.events.lock().unwrap().push(event);
    }
}

impl DownloadListener<String> for Recorder {
    fn on_start(&self, key: &String) {
        self.push(Event::Start(key.clone()));
    }

    fn on_progress(&self, done: u64, total: Option<u64>, _key: &String) {
        self.push(Event::Progress(done, total));
    }

    fn on_complete(&self, path: &Path, key: &String) {
        self.push(Event::Complete(path.display().to_string(), key.clone()));
    }

    fn on_error(&self, error: &TransferError, key: &String) {
        self.push(Event::Error(error.kind(), error.to_string(), key.clone()));
    }
}

impl UploadListener<String> for Recorder {
    fn on_start(&self, key: &String) {
        self.push(Event::Start(key.clone()));
    }

    fn on_complete(&self, body: &str, key: &String) {
        self.push(Event::Complete(body.to_string(), key.clone()));
    }

    fn on_error(&self, error: &TransferError, key: &String) {
        self.push(Event::Error(error.kind(), error.to_string(), key.clone()));
    }
}

/// Summary of an outcome record.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub url: String,
    pub method: &'static str,
    pub status: Option<u32>,
    pub success: Option<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Default)]
pub struct MemorySink(Mutex<Vec<Seen>>);

impl MemorySink {
    pub fn records(&self) -> Vec<Seen> {
        self.0.lock().unwrap().clone()
    }
}

impl OutcomeSink for MemorySink {
    fn record(&self, record: &OutcomeRecord) {
        let success = match &record.result {
            hxfer_core::OutcomeResult::Success(msg) => Some(msg.clone()),
            hxfer_core::OutcomeResult::Failure(_) => None,
        };
        self.0.lock().unwrap().push(Seen {
            url: record.url.clone(),
            method: record.method,
            status: record.response_code,
            success,
            headers: record.request_headers.clone(),
        });
    }
}

pub const WAIT: Duration = Duration::from_secs(15);

pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Deterministic body of `len` bytes.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn dest(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}
