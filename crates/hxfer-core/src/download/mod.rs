//! HTTP(S) download state machine.
//!
//! Started → Connected → Transferring → Completed | Cancelled | Failed.
//! Non-range downloads require `200` and replace the destination. Range
//! downloads request the bytes after the current file length and append on
//! `206`. Cancellation is checked before every chunk and from curl's progress
//! callback, so a stalled read is interrupted as well. Partial files are left
//! on disk after a cancel or failure.

mod handler;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use curl::easy::Easy2;
use url::Url;

use crate::error::{ConfigError, TransferError};
use crate::outcome::{OutcomeRecord, OutcomeResult, OutcomeSink};
use crate::scheduler::TransferScheduler;
use crate::task::{TaskContext, TaskKey, TaskOutcome, Transfer, TransferTask};
use crate::transport::{self, RequestHeaders, Timeouts};
use crate::trust::TrustPolicy;

use handler::{DownloadHandler, WriteMode};

pub const DOWNLOAD_COMPLETE: &str = "Download Complete";
pub const DOWNLOAD_CANCELLED: &str = "Download Cancelled";

/// Callbacks for one download. Invoked on a worker thread, never on the
/// submitting thread.
pub trait DownloadListener<K>: Send + Sync {
    fn on_start(&self, _key: &K) {}

    /// Cumulative bytes on disk and the expected final size, after every chunk.
    fn on_progress(&self, _done: u64, _total: Option<u64>, _key: &K) {}

    fn on_complete(&self, path: &Path, key: &K);

    fn on_error(&self, error: &TransferError, key: &K);
}

/// Parameters of a download.
#[derive(Debug, Clone)]
pub struct Download {
    url: Url,
    destination: PathBuf,
    resume: bool,
    trust: TrustPolicy,
}

impl Download {
    /// Download `url` into `destination`. Fails on a malformed or non-http(s) URL.
    pub fn new(url: &str, destination: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self {
            url: transport::parse_url(url)?,
            destination: destination.into(),
            resume: false,
            trust: TrustPolicy::Default,
        })
    }

    /// Continue from the current length of the destination file with a range request.
    ///
    /// A server that ignores the range and answers `200` gets the whole body
    /// written from scratch: the destination is truncated first.
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_resume(&self) -> bool {
        self.resume
    }

    pub fn trust_policy(&self) -> &TrustPolicy {
        &self.trust
    }

    fn write_mode(&self) -> Result<WriteMode, TransferError> {
        if !self.resume {
            return Ok(WriteMode::Replace);
        }
        let existing = match fs::metadata(&self.destination) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(TransferError::io(
                    format!("stat {}", self.destination.display()),
                    e,
                ))
            }
        };
        Ok(WriteMode::Resume { existing })
    }

    fn record(
        &self,
        headers: &RequestHeaders,
        response_code: Option<u32>,
        result: OutcomeResult,
    ) -> OutcomeRecord {
        OutcomeRecord {
            url: self.url.to_string(),
            method: "GET",
            request_headers: headers.to_pairs(),
            response_code,
            result,
        }
    }

    fn fail<K: TaskKey>(
        &self,
        ctx: &TaskContext<K, dyn DownloadListener<K>>,
        sink: &dyn OutcomeSink,
        headers: &RequestHeaders,
        response_code: Option<u32>,
        error: TransferError,
    ) -> TaskOutcome {
        tracing::warn!(key = ?ctx.key(), url = %self.url, kind = ?error.kind(), "download failed: {}", error);
        ctx.notify(|l| l.on_error(&error, ctx.key()));
        sink.record(&self.record(headers, response_code, OutcomeResult::Failure(error)));
        TaskOutcome::Failed
    }
}

impl<K: TaskKey> Transfer<K> for Download {
    type Listener = dyn DownloadListener<K>;

    fn execute(
        &self,
        ctx: &Arc<TaskContext<K, Self::Listener>>,
        sink: &dyn OutcomeSink,
    ) -> TaskOutcome {
        let key = ctx.key();
        ctx.notify(|l| l.on_start(key));

        let mut headers = RequestHeaders::new();
        let mode = match self.write_mode() {
            Ok(mode) => mode,
            Err(e) => return self.fail(ctx, sink, &headers, None, e),
        };
        if let Some(range) = mode.range() {
            headers.set("Range", range);
        }

        let mut easy = Easy2::new(DownloadHandler::new(
            Arc::clone(ctx),
            self.destination.clone(),
            mode,
        ));
        if let Err(e) = transport::configure(&mut easy, &self.url, &self.trust, Timeouts::default(), &headers) {
            return self.fail(ctx, sink, &headers, None, e);
        }
        if ctx.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        tracing::debug!(?key, url = %self.url, ?mode, "download starting");
        let performed = easy.perform();
        let response_code = easy.get_ref().head.status;

        if ctx.is_cancelled() {
            let h = easy.get_ref();
            tracing::info!(?key, done = h.done(), "download cancelled");
            if response_code.is_some() {
                sink.record(&self.record(
                    &headers,
                    response_code,
                    OutcomeResult::Success(DOWNLOAD_CANCELLED.to_string()),
                ));
            }
            return TaskOutcome::Cancelled;
        }

        let handler = easy.get_mut();
        let finished = match performed {
            Ok(()) => handler.open(),
            Err(e) => Err(handler.failure.take().unwrap_or(TransferError::Curl(e))),
        };
        if let Err(e) = finished {
            return self.fail(ctx, sink, &headers, response_code, e);
        }

        tracing::info!(?key, bytes = handler.done(), path = %self.destination.display(), "download complete");
        ctx.notify(|l| l.on_complete(&self.destination, key));
        sink.record(&self.record(
            &headers,
            response_code,
            OutcomeResult::Success(DOWNLOAD_COMPLETE.to_string()),
        ));
        TaskOutcome::Completed
    }
}

pub type DownloadTask<K> = TransferTask<K, Download>;
pub type DownloadScheduler<K> = TransferScheduler<K, Download>;
