//! HTTP(S) multipart upload state machine.
//!
//! Started → Connected → Transferring → Completed | Cancelled | Failed.
//! The request is a multipart/form-data POST and must be answered with `200`;
//! the response body is handed to the listener as text.
//!
//! Uploads observe cancellation only until the body is built and the request
//! is about to be sent. Once bytes are on the wire the upload runs to
//! completion or failure; there is no per-chunk cancellation as with downloads.

mod handler;
pub mod multipart;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use curl::easy::Easy2;
use url::Url;

use crate::error::{ConfigError, Expected, TransferError};
use crate::outcome::{OutcomeRecord, OutcomeResult, OutcomeSink};
use crate::scheduler::TransferScheduler;
use crate::task::{TaskContext, TaskKey, TaskOutcome, Transfer, TransferTask};
use crate::transport::{self, RequestHeaders, Timeouts, USER_AGENT};
use crate::trust::TrustPolicy;

use handler::UploadHandler;
use multipart::FilePart;

/// Header key read as a connect-timeout override in milliseconds.
pub const CONNECT_TIMEOUT_KEY: &str = "connectTimeout";
/// Header key read as a read-timeout override in milliseconds.
pub const READ_TIMEOUT_KEY: &str = "readTimeout";
pub const DEFAULT_FILE_FIELD: &str = "file";

/// Callbacks for one upload. Invoked on a worker thread.
pub trait UploadListener<K>: Send + Sync {
    fn on_start(&self, _key: &K) {}

    /// Response body of a successful (`200`) upload.
    fn on_complete(&self, body: &str, key: &K);

    fn on_error(&self, error: &TransferError, key: &K);
}

/// Parameters of an upload.
#[derive(Debug, Clone)]
pub struct Upload {
    url: Url,
    fields: Vec<(String, String)>,
    file: Option<PathBuf>,
    file_field: String,
    headers: RequestHeaders,
    timeouts: Timeouts,
    trust: TrustPolicy,
}

fn parse_millis(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidTimeout {
            name,
            value: value.to_string(),
        }),
    }
}

impl Upload {
    pub fn new(url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            url: transport::parse_url(url)?,
            fields: Vec::new(),
            file: None,
            file_field: DEFAULT_FILE_FIELD.to_string(),
            headers: RequestHeaders::new(),
            timeouts: Timeouts::default(),
            trust: TrustPolicy::Default,
        })
    }

    /// Add a form field. Fields are sent in insertion order.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Form field name of the file part (default `file`).
    pub fn file_field(mut self, name: impl Into<String>) -> Self {
        self.file_field = name.into();
        self
    }

    /// Override a request header. `connectTimeout` and `readTimeout` are not
    /// sent; they set the timeouts in milliseconds.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        match name {
            CONNECT_TIMEOUT_KEY => self.timeouts.connect = parse_millis(CONNECT_TIMEOUT_KEY, value)?,
            READ_TIMEOUT_KEY => self.timeouts.read = parse_millis(READ_TIMEOUT_KEY, value)?,
            _ => self.headers.set(name, value),
        }
        Ok(self)
    }

    pub fn headers<'a, I>(self, headers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        headers
            .into_iter()
            .try_fold(self, |upload, (name, value)| upload.header(name, value))
    }

    pub fn trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn trust_policy(&self) -> &TrustPolicy {
        &self.trust
    }

    /// Default upload headers with the caller's overrides applied.
    pub fn request_headers(&self) -> RequestHeaders {
        let mut headers = RequestHeaders::new();
        headers.set("Connection", "Keep-Alive");
        headers.set("Accept", "*/*");
        headers.set("Cache-Control", "no-cache");
        headers.set("Content-Type", multipart::content_type());
        headers.set("User-Agent", USER_AGENT);
        headers.set("Expect", "");
        for (name, value) in self.headers.iter() {
            headers.set(name, value);
        }
        headers
    }

    fn record(
        &self,
        headers: &RequestHeaders,
        response_code: Option<u32>,
        result: OutcomeResult,
    ) -> OutcomeRecord {
        OutcomeRecord {
            url: self.url.to_string(),
            method: "POST",
            request_headers: headers.to_pairs(),
            response_code,
            result,
        }
    }

    fn fail<K: TaskKey>(
        &self,
        ctx: &TaskContext<K, dyn UploadListener<K>>,
        sink: &dyn OutcomeSink,
        headers: &RequestHeaders,
        response_code: Option<u32>,
        error: TransferError,
    ) -> TaskOutcome {
        tracing::warn!(key = ?ctx.key(), url = %self.url, kind = ?error.kind(), "upload failed: {}", error);
        ctx.notify(|l| l.on_error(&error, ctx.key()));
        sink.record(&self.record(headers, response_code, OutcomeResult::Failure(error)));
        TaskOutcome::Failed
    }
}

impl<K: TaskKey> Transfer<K> for Upload {
    type Listener = dyn UploadListener<K>;

    fn execute(
        &self,
        ctx: &Arc<TaskContext<K, Self::Listener>>,
        sink: &dyn OutcomeSink,
    ) -> TaskOutcome {
        let key = ctx.key();
        ctx.notify(|l| l.on_start(key));
        let headers = self.request_headers();
        if ctx.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        let file = self.file.as_deref().map(|path| FilePart {
            field: &self.file_field,
            path,
        });
        let body = match multipart::build(&self.fields, file) {
            Ok(body) => body,
            Err(e) => return self.fail(ctx, sink, &headers, None, e),
        };

        let body_len = body.len;
        let mut easy = Easy2::new(UploadHandler::new(Arc::clone(ctx), body.reader));
        let configured = transport::configure(&mut easy, &self.url, &self.trust, self.timeouts, &headers)
            .and_then(|()| {
                easy.post(true)?;
                easy.post_field_size(body_len)?;
                Ok(())
            });
        if let Err(e) = configured {
            return self.fail(ctx, sink, &headers, None, e);
        }
        // Last cancellation point; the body is streamed uninterrupted from here.
        if ctx.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        tracing::debug!(?key, url = %self.url, bytes = body_len, "upload starting");
        let performed = easy.perform();
        let handler = easy.get_mut();
        let response_code = handler.head.status;
        let result = match performed {
            Err(e) => Err(match handler.read_error.take() {
                Some(io) => TransferError::io("read upload body", io),
                None => TransferError::Curl(e),
            }),
            Ok(()) if !Expected::Ok.accepts(response_code.unwrap_or(0)) => Err(TransferError::Status {
                status: response_code.unwrap_or(0),
                expected: Expected::Ok,
            }),
            Ok(()) => Ok(handler.response_text()),
        };

        match result {
            Ok(body) => {
                tracing::info!(?key, sent = handler.sent, status = ?response_code, "upload complete");
                ctx.notify(|l| l.on_complete(&body, key));
                sink.record(&self.record(&headers, response_code, OutcomeResult::Success(body)));
                TaskOutcome::Completed
            }
            Err(e) => self.fail(ctx, sink, &headers, response_code, e),
        }
    }
}

pub type UploadTask<K> = TransferTask<K, Upload>;
pub type UploadScheduler<K> = TransferScheduler<K, Upload>;
