//! Prioritized HTTP(S) transfer manager.
//!
//! A [`TransferScheduler`] runs [`Download`] and [`Upload`] tasks on a small
//! worker pool in priority order, keeps at most one transfer per key in
//! flight, and supports cooperative cancellation. TLS verification is chosen
//! per transfer with a [`TrustPolicy`]. Listener callbacks run on worker
//! threads; callers that need another thread must re-dispatch themselves.

pub mod config;
pub mod logging;

pub mod control;
pub mod download;
pub mod error;
pub mod outcome;
pub mod scheduler;
pub mod task;
pub mod transport;
pub mod trust;
pub mod upload;

pub use control::CancelToken;
pub use download::{Download, DownloadListener, DownloadScheduler, DownloadTask};
pub use error::{ConfigError, ErrorKind, TransferError};
pub use outcome::{NullSink, OutcomeRecord, OutcomeResult, OutcomeSink, TracingSink};
pub use scheduler::{PoolOptions, Submission, SubmitError, TransferScheduler};
pub use task::{SortOrder, TaskHandle, TaskKey, TaskOutcome, TaskState, Transfer, TransferTask};
pub use trust::{TrustMode, TrustPolicy};
pub use upload::{Upload, UploadListener, UploadScheduler, UploadTask};
