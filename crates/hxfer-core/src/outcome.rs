//! Transfer outcome records and the sink that receives them.
//!
//! Every exchange that reached the network produces exactly one
//! `OutcomeRecord`, handed to the scheduler's `OutcomeSink`. A task cancelled
//! before its connection was opened produces none.

use std::fmt;

use crate::error::TransferError;

/// How an exchange ended.
#[derive(Debug)]
pub enum OutcomeResult {
    /// Success message (downloads) or the response body (uploads).
    Success(String),
    Failure(TransferError),
}

/// Summary of one HTTP exchange.
#[derive(Debug)]
pub struct OutcomeRecord {
    pub url: String,
    pub method: &'static str,
    pub request_headers: Vec<(String, String)>,
    /// Status of the final response, when one was received.
    pub response_code: Option<u32>,
    pub result: OutcomeResult,
}

impl OutcomeRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Success(_))
    }
}

/// Receiver of outcome records. Called from worker threads.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, record: &OutcomeRecord);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutcomeSink for NullSink {
    fn record(&self, _record: &OutcomeRecord) {}
}

/// Emits outcome records as `tracing` events under the `hxfer::outcome` target.
#[derive(Debug, Clone)]
pub struct TracingSink {
    enabled: bool,
    tag: String,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(true, crate::config::DEFAULT_LOG_TAG)
    }
}

impl TracingSink {
    pub fn new(enabled: bool, tag: impl Into<String>) -> Self {
        Self {
            enabled,
            tag: tag.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl OutcomeSink for TracingSink {
    fn record(&self, record: &OutcomeRecord) {
        if !self.enabled {
            return;
        }
        let headers = HeaderList(&record.request_headers);
        let status = StatusCode(record.response_code);
        match &record.result {
            OutcomeResult::Success(message) => {
                tracing::info!(
                    target: "hxfer::outcome",
                    tag = %self.tag,
                    url = %record.url,
                    method = record.method,
                    status = %status,
                    headers = %headers,
                    "{}",
                    first_line(message)
                );
                if let Some(pretty) = pretty_json(message) {
                    tracing::debug!(target: "hxfer::outcome", tag = %self.tag, "response body:\n{}", pretty);
                }
            }
            OutcomeResult::Failure(err) => {
                tracing::error!(
                    target: "hxfer::outcome",
                    tag = %self.tag,
                    url = %record.url,
                    method = record.method,
                    status = %status,
                    headers = %headers,
                    kind = ?err.kind(),
                    "{}",
                    error_chain(err)
                );
            }
        }
    }
}

struct HeaderList<'a>(&'a [(String, String)]);

impl fmt::Display for HeaderList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        f.write_str("}")
    }
}

struct StatusCode(Option<u32>);

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "{}", code),
            None => f.write_str("-"),
        }
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

/// Pretty-printed JSON when `body` is a JSON object or array.
fn pretty_json(body: &str) -> Option<String> {
    let trimmed = body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

/// `err: cause: cause` rendering of an error and its sources.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}
