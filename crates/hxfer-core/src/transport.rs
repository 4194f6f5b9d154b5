//! Shared curl plumbing for downloads and uploads.
//!
//! Fixed timeouts, request header lists, status-line tracking and the common
//! handle setup (URL, timeouts, redirects, trust policy, progress callbacks).

use std::str;
use std::time::Duration;

use curl::easy::{Easy2, List};
use url::Url;

use crate::error::{ConfigError, TransferError};
use crate::trust::TrustPolicy;

/// Connect timeout applied to every exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Read timeout: the transfer is aborted when no byte arrives for this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Receive/send buffer size; body callbacks see at most this many bytes.
pub const CHUNK_SIZE: usize = 8 * 1024;
pub const USER_AGENT: &str = concat!("hxfer/", env!("CARGO_PKG_VERSION"));

/// Connect and read timeouts for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            read: READ_TIMEOUT,
        }
    }
}

/// Parse `raw` and require an http or https scheme.
pub fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

/// Ordered request headers with case-insensitive replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing an existing header with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }

    /// An empty value renders as `Name:`, which tells curl to drop that header.
    pub(crate) fn to_list(&self) -> Result<List, curl::Error> {
        let mut list = List::new();
        for (name, value) in &self.entries {
            let name = name.trim();
            let value = value.trim();
            if value.is_empty() {
                list.append(&format!("{}:", name))?;
            } else {
                list.append(&format!("{}: {}", name, value))?;
            }
        }
        Ok(list)
    }
}

/// Status and length of the final response, collected from header lines.
/// Each status line (redirects, `100 Continue`) starts a new response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    pub(crate) fn observe(&mut self, data: &[u8]) {
        let Ok(line) = str::from_utf8(data) else {
            return;
        };
        let line = line.trim();
        if line.starts_with("HTTP/") {
            *self = ResponseHead {
                status: line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|code| code.parse().ok()),
                content_length: None,
            };
            return;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                self.content_length = value.trim().parse().ok();
            }
        }
    }
}

/// Common handle setup. Trust options are only touched for non-default policies.
pub(crate) fn configure<H>(
    easy: &mut Easy2<H>,
    url: &Url,
    trust: &TrustPolicy,
    timeouts: Timeouts,
    headers: &RequestHeaders,
) -> Result<(), TransferError> {
    easy.url(url.as_str())?;
    easy.connect_timeout(timeouts.connect)?;
    // Less than 1 byte/s for the read window counts as a stalled read.
    easy.low_speed_limit(1)?;
    easy.low_speed_time(timeouts.read.max(Duration::from_secs(1)))?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.buffer_size(CHUNK_SIZE)?;
    easy.upload_buffer_size(CHUNK_SIZE)?;
    easy.useragent(USER_AGENT)?;
    if !headers.is_empty() {
        easy.http_headers(headers.to_list()?)?;
    }
    trust.apply(easy)?;
    easy.progress(true)?;
    Ok(())
}
