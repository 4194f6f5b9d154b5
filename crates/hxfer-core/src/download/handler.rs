//! Easy2 handler for one download.
//! Checks the status before the first body byte; writes chunks to the destination file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use curl::easy::{Handler, WriteError};

use crate::error::{Expected, TransferError};
use crate::task::{TaskContext, TaskKey, TaskState};
use crate::transport::ResponseHead;

use super::DownloadListener;

/// How the destination file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WriteMode {
    /// Require 200 and replace any existing file.
    Replace,
    /// Resume after `existing` bytes. 206 appends; 200 restarts the file from zero.
    Resume { existing: u64 },
}

impl WriteMode {
    pub(super) fn expected(self) -> Expected {
        match self {
            WriteMode::Replace => Expected::Ok,
            WriteMode::Resume { .. } => Expected::OkOrPartial,
        }
    }

    /// Range header value, when a range request is needed.
    pub(super) fn range(self) -> Option<String> {
        match self {
            WriteMode::Resume { existing } if existing > 0 => Some(format!("bytes={}-", existing)),
            _ => None,
        }
    }
}

pub(super) struct DownloadHandler<K: TaskKey> {
    ctx: Arc<TaskContext<K, dyn DownloadListener<K>>>,
    path: PathBuf,
    mode: WriteMode,
    pub(super) head: ResponseHead,
    file: Option<File>,
    /// Bytes already on disk that count toward progress.
    base: u64,
    pub(super) written: u64,
    /// Local or status failure that made `write` abort the transfer.
    pub(super) failure: Option<TransferError>,
}

impl<K: TaskKey> DownloadHandler<K> {
    pub(super) fn new(
        ctx: Arc<TaskContext<K, dyn DownloadListener<K>>>,
        path: PathBuf,
        mode: WriteMode,
    ) -> Self {
        Self {
            ctx,
            path,
            mode,
            head: ResponseHead::default(),
            file: None,
            base: 0,
            written: 0,
            failure: None,
        }
    }

    /// Total expected size, counting bytes already present.
    pub(super) fn total(&self) -> Option<u64> {
        self.head.content_length.map(|n| n.saturating_add(self.base))
    }

    pub(super) fn done(&self) -> u64 {
        self.base.saturating_add(self.written)
    }

    /// Validate the status and open the destination. Called before the first
    /// chunk, or after the transfer when the body was empty.
    pub(super) fn open(&mut self) -> Result<(), TransferError> {
        if self.file.is_some() {
            return Ok(());
        }
        let expected = self.mode.expected();
        let status = self.head.status.unwrap_or(0);
        if !expected.accepts(status) {
            return Err(TransferError::Status { status, expected });
        }
        let file = match self.mode {
            WriteMode::Resume { existing } if status == 206 => {
                self.base = existing;
                OpenOptions::new().create(true).append(true).open(&self.path)
            }
            WriteMode::Resume { existing } if existing > 0 => {
                tracing::debug!(path = %self.path.display(), "server ignored range, restarting file");
                File::create(&self.path)
            }
            _ => File::create(&self.path),
        }
        .map_err(|e| TransferError::io(format!("open {}", self.path.display()), e))?;
        self.file = Some(file);
        self.ctx.set_state(TaskState::Transferring);
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.open()?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(data)
                .map_err(|e| TransferError::io(format!("write {}", self.path.display()), e))?;
        }
        self.written += data.len() as u64;
        let (done, total) = (self.done(), self.total());
        let ctx = &self.ctx;
        ctx.notify(|l| l.on_progress(done, total, ctx.key()));
        Ok(())
    }
}

impl<K: TaskKey> Handler for DownloadHandler<K> {
    fn header(&mut self, data: &[u8]) -> bool {
        if self.head.status.is_none() && self.ctx.state() == TaskState::Started {
            self.ctx.set_state(TaskState::Connected);
        }
        self.head.observe(data);
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.ctx.is_cancelled() {
            return Ok(0);
        }
        match self.write_chunk(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                self.failure = Some(e);
                Ok(0)
            }
        }
    }

    // Lets a cancel interrupt a stalled read instead of waiting for the next chunk.
    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        !self.ctx.is_cancelled()
    }
}
