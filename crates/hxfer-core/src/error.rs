//! Error taxonomy for transfers.
//!
//! `ConfigError` covers bad caller input (URLs, certificates, keystores, header
//! overrides) and is raised before any connection is attempted.
//! `TransferError` is what a task's error callback and the outcome sink receive.
//! Cooperative cancellation is not an error and has no variant here.

use std::fmt;
use std::io;

/// Invalid caller-supplied configuration, detected before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported URL scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("malformed PEM data in {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: pem::PemError,
    },

    #[error("{what} is not a DER-encoded X.509 certificate")]
    NotACertificate { what: &'static str },

    #[error("no certificate found in {what}")]
    MissingCertificate { what: &'static str },

    #[error("expected exactly one certificate in {what}, found {found}")]
    TooManyCertificates { what: &'static str, found: usize },

    #[error("client keystore contains no private key")]
    MissingPrivateKey,

    #[error("client keystore contains {0} private keys, expected one")]
    TooManyPrivateKeys(usize),

    #[error("client private key is encrypted but no password was supplied")]
    MissingKeyPassword,

    #[error("invalid value {value:?} for {name}: expected milliseconds")]
    InvalidTimeout { name: &'static str, value: String },

    #[error("TLS backend rejected the trust configuration: {0}")]
    TlsBackend(#[source] curl::Error),
}

/// Failure of a single HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The server answered with a status the transfer does not accept.
    #[error("request result code: {status} (expected {expected})")]
    Status { status: u32, expected: Expected },

    /// Transport failure reported by curl (timeouts, TLS handshake, socket I/O).
    #[error("{0}")]
    Curl(#[from] curl::Error),

    /// Local file failure (destination or upload source).
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }

    /// Coarse classification for logging and callers that branch on failure type.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Config(_) => ErrorKind::Config,
            TransferError::Status { .. } => ErrorKind::Status,
            TransferError::Curl(e) => classify_curl_error(e),
            TransferError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Accepted status codes, rendered in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Ok,
    OkOrPartial,
}

impl Expected {
    pub fn accepts(self, status: u32) -> bool {
        match self {
            Expected::Ok => status == 200,
            Expected::OkOrPartial => status == 200 || status == 206,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Ok => write!(f, "200"),
            Expected::OkOrPartial => write!(f, "200 or 206"),
        }
    }
}

/// High-level classification of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input; no connection was attempted.
    Config,
    /// Connect or read timed out.
    Timeout,
    /// TLS handshake or certificate verification failed.
    Tls,
    /// Network-level failure (DNS, refused, reset).
    Connection,
    /// Unexpected HTTP status.
    Status,
    /// Local file failure.
    Io,
    Other,
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_ssl_connect_error()
        || e.is_peer_failed_verification()
        || e.is_ssl_certproblem()
        || e.is_ssl_cacert()
        || e.is_ssl_cacert_badfile()
        || e.is_ssl_cipher()
    {
        return ErrorKind::Tls;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}
