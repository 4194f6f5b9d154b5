//! Multipart uploads against a local HTTP server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::http_server::{self, ServerOptions};
use common::{wait_until, Event, MemorySink, Recorder, WAIT};
use hxfer_core::error::ErrorKind;
use hxfer_core::upload::multipart::BOUNDARY;
use hxfer_core::{PoolOptions, TaskState, Upload, UploadScheduler, UploadTask};

fn scheduler() -> (UploadScheduler<String>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let sched = UploadScheduler::with_options(
        PoolOptions {
            max_workers: 2,
            keep_alive: Duration::from_secs(1),
        },
        sink.clone(),
    );
    (sched, sink)
}

#[test]
fn upload_two_fields_and_a_file() {
    let server = http_server::start(Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, b"line one\nline two\n").unwrap();
    let (sched, sink) = scheduler();
    let (rec, done) = Recorder::new();

    let upload = Upload::new(&server.url_for("upload"))
        .unwrap()
        .field("user", "alice")
        .field("comment", "hello world")
        .file(&file)
        .header("X-Trace", "t-1")
        .unwrap();
    let task = UploadTask::new("up".to_string(), upload);
    let handle = task.handle();
    sched.submit(task, rec.clone()).unwrap();

    assert_eq!(
        done.recv_timeout(WAIT).unwrap(),
        Event::Complete("{\"ok\":true}".to_string(), "up".to_string())
    );
    assert!(wait_until(|| handle.state() == TaskState::Completed));
    assert_eq!(rec.events()[0], Event::Start("up".to_string()));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/upload");
    assert_eq!(req.header("x-trace"), Some("t-1"));
    assert_eq!(req.header("cache-control"), Some("no-cache"));
    assert!(req.header("content-type").unwrap().contains(BOUNDARY));

    let text = String::from_utf8(req.body.clone()).unwrap();
    assert_eq!(text.matches(&format!("--{}\r\n", BOUNDARY)).count(), 3);
    assert!(text.contains("name=\"user\"\r\n\r\nalice\r\n"));
    assert!(text.contains("name=\"comment\"\r\n\r\nhello+world\r\n"));
    assert!(text.contains("name=\"file\";filename=\"notes.txt\"\r\n\r\nline one\nline two\n\r\n"));
    assert!(text.ends_with(&format!("--{}--\r\n", BOUNDARY)));

    assert!(wait_until(|| sink.records().len() == 1));
    let record = &sink.records()[0];
    assert_eq!(record.method, "POST");
    assert_eq!(record.status, Some(200));
    assert_eq!(record.success.as_deref(), Some("{\"ok\":true}"));
}

#[test]
fn upload_fields_only_with_custom_file_field_unused() {
    let server = http_server::start(Vec::new());
    let (sched, _sink) = scheduler();
    let (rec, done) = Recorder::new();
    let upload = Upload::new(&server.url)
        .unwrap()
        .field("only", "field")
        .file_field("attachment");
    sched
        .submit(UploadTask::new("fields".to_string(), upload), rec)
        .unwrap();
    assert!(matches!(done.recv_timeout(WAIT).unwrap(), Event::Complete(..)));
    let text = String::from_utf8(server.requests()[0].body.clone()).unwrap();
    assert!(!text.contains("filename="));
    assert!(!text.contains("attachment"));
}

#[test]
fn upload_non_200_is_an_error() {
    let server = http_server::start_with_options(
        Vec::new(),
        ServerOptions {
            force_status: Some(500),
            ..ServerOptions::default()
        },
    );
    let (sched, sink) = scheduler();
    let (rec, done) = Recorder::new();
    let upload = Upload::new(&server.url).unwrap().field("a", "b");
    sched
        .submit(UploadTask::new("fail".to_string(), upload), rec)
        .unwrap();
    match done.recv_timeout(WAIT).unwrap() {
        Event::Error(kind, message, key) => {
            assert_eq!(kind, ErrorKind::Status);
            assert!(message.contains("500"));
            assert_eq!(key, "fail");
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(wait_until(|| sink.records().len() == 1));
    assert_eq!(sink.records()[0].status, Some(500));
    assert!(sink.records()[0].success.is_none());
}

#[test]
fn upload_missing_file_fails_before_sending() {
    let server = http_server::start(Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let (sched, _sink) = scheduler();
    let (rec, done) = Recorder::new();
    let upload = Upload::new(&server.url).unwrap().file(dir.path().join("absent"));
    sched
        .submit(UploadTask::new("nofile".to_string(), upload), rec)
        .unwrap();
    match done.recv_timeout(WAIT).unwrap() {
        Event::Error(kind, _, _) => assert_eq!(kind, ErrorKind::Io),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(server.hits(), 0);
}

#[test]
fn upload_cancelled_before_start_sends_nothing() {
    let server = http_server::start(Vec::new());
    let (sched, sink) = scheduler();
    let (rec, _done) = Recorder::new();
    let task = UploadTask::new("c".to_string(), Upload::new(&server.url).unwrap());
    let handle = task.handle();
    task.cancel();
    sched.submit(task, rec.clone()).unwrap();
    assert!(wait_until(|| handle.state() == TaskState::Cancelled));
    assert!(wait_until(|| sched.in_flight() == 0));
    assert!(rec.events().is_empty());
    assert_eq!(server.hits(), 0);
    assert!(sink.records().is_empty());
}
