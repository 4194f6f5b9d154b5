//! TLS trust policies.
//!
//! A `TrustPolicy` decides which server certificates and hostnames a transfer
//! accepts and, for mutual TLS, which client identity it presents. Inputs are
//! validated when the policy is built, so a bad certificate or keystore is a
//! `ConfigError` returned to the caller before any task is submitted. A policy
//! never falls back to platform defaults on bad input.

mod keystore;

use std::fmt;

use curl::easy::Easy2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Verification mode, without the data a mode needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustMode {
    /// Platform trust store and hostname check, unmodified.
    #[default]
    Default,
    /// Accept any certificate chain and any hostname.
    Skip,
    /// Platform trust store validates the chain; hostname check always passes.
    ClientOnly,
    /// Only the caller's certificate is trusted; hostname check always passes.
    ClientWithPinnedCert,
    /// Caller's trust store plus a client identity; default hostname check.
    Mutual,
}

impl fmt::Display for TrustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustMode::Default => "default",
            TrustMode::Skip => "skip",
            TrustMode::ClientOnly => "client-only",
            TrustMode::ClientWithPinnedCert => "client-with-pinned-cert",
            TrustMode::Mutual => "mutual",
        };
        f.write_str(s)
    }
}

/// A single trusted server certificate, re-encoded as PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedCertificate {
    pem: Vec<u8>,
}

impl PinnedCertificate {
    /// Parse one certificate from PEM or DER bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let cert = keystore::single_certificate(bytes, "pinned certificate")?;
        Ok(Self {
            pem: keystore::encode(&[cert]),
        })
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }
}

/// Client certificate chain and private key presented during a mutual handshake.
#[derive(Clone)]
pub struct ClientIdentity {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    password: Option<String>,
}

impl ClientIdentity {
    /// Parse a PEM keystore holding the client certificate chain and exactly one
    /// private key. `password` decrypts the key and is required when it is encrypted.
    pub fn from_pem(bytes: &[u8], password: Option<&str>) -> Result<Self, ConfigError> {
        let blocks = keystore::parse_blocks(bytes, "client keystore")?;
        let certs = keystore::certificates(&blocks, "client keystore")?;
        let key = keystore::private_key(&blocks)?;
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);
        if keystore::is_encrypted(&key) && password.is_none() {
            return Err(ConfigError::MissingKeyPassword);
        }
        Ok(Self {
            cert_pem: keystore::encode(&certs),
            key_pem: keystore::encode(&[key]),
            password,
        })
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key", &"<redacted>")
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// Certificates trusted to sign the server chain in mutual mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStore {
    pem: Vec<u8>,
    len: usize,
}

impl TrustStore {
    /// Parse a PEM bundle of one or more certificates. Non-certificate blocks are ignored.
    pub fn from_pem(bytes: &[u8]) -> Result<Self, ConfigError> {
        let blocks = keystore::parse_blocks(bytes, "server trust store")?;
        let certs = keystore::certificates(&blocks, "server trust store")?;
        Ok(Self {
            pem: keystore::encode(&certs),
            len: certs.len(),
        })
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// Number of trusted certificates.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Trust policy applied to a transfer's TLS handshake. One variant per mode,
/// each carrying only the data that mode needs.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    #[default]
    Default,
    /// Disables all certificate and hostname verification. Explicit opt-in only.
    Skip,
    ClientOnly,
    PinnedCert(PinnedCertificate),
    Mutual {
        identity: ClientIdentity,
        trust_store: TrustStore,
    },
}

/// Concrete TLS switches a policy resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsSettings<'a> {
    pub verify_peer: bool,
    pub verify_host: bool,
    /// Replaces the platform trust store when set.
    pub ca_bundle: Option<&'a [u8]>,
    pub client_cert: Option<&'a [u8]>,
    pub client_key: Option<&'a [u8]>,
    pub key_password: Option<&'a str>,
}

impl TrustPolicy {
    pub fn pinned_cert(cert: &[u8]) -> Result<Self, ConfigError> {
        Ok(TrustPolicy::PinnedCert(PinnedCertificate::from_bytes(cert)?))
    }

    pub fn mutual(
        identity_pem: &[u8],
        identity_password: Option<&str>,
        trust_store_pem: &[u8],
    ) -> Result<Self, ConfigError> {
        Ok(TrustPolicy::Mutual {
            identity: ClientIdentity::from_pem(identity_pem, identity_password)?,
            trust_store: TrustStore::from_pem(trust_store_pem)?,
        })
    }

    pub fn mode(&self) -> TrustMode {
        match self {
            TrustPolicy::Default => TrustMode::Default,
            TrustPolicy::Skip => TrustMode::Skip,
            TrustPolicy::ClientOnly => TrustMode::ClientOnly,
            TrustPolicy::PinnedCert(_) => TrustMode::ClientWithPinnedCert,
            TrustPolicy::Mutual { .. } => TrustMode::Mutual,
        }
    }

    pub fn settings(&self) -> TlsSettings<'_> {
        let base = TlsSettings {
            verify_peer: true,
            verify_host: true,
            ca_bundle: None,
            client_cert: None,
            client_key: None,
            key_password: None,
        };
        match self {
            TrustPolicy::Default => base,
            TrustPolicy::Skip => TlsSettings {
                verify_peer: false,
                verify_host: false,
                ..base
            },
            TrustPolicy::ClientOnly => TlsSettings {
                verify_host: false,
                ..base
            },
            TrustPolicy::PinnedCert(cert) => TlsSettings {
                verify_host: false,
                ca_bundle: Some(cert.pem()),
                ..base
            },
            TrustPolicy::Mutual {
                identity,
                trust_store,
            } => TlsSettings {
                ca_bundle: Some(trust_store.pem()),
                client_cert: Some(identity.cert_pem()),
                client_key: Some(identity.key_pem()),
                key_password: identity.password(),
                ..base
            },
        }
    }

    /// Apply the policy to a curl handle. `Default` leaves the handle untouched.
    pub(crate) fn apply<H>(&self, easy: &mut Easy2<H>) -> Result<(), ConfigError> {
        if let TrustPolicy::Default = self {
            return Ok(());
        }
        let s = self.settings();
        (|| -> Result<(), curl::Error> {
            easy.ssl_verify_peer(s.verify_peer)?;
            easy.ssl_verify_host(s.verify_host)?;
            if let Some(ca) = s.ca_bundle {
                easy.ssl_cainfo_blob(ca)?;
            }
            if let (Some(cert), Some(key)) = (s.client_cert, s.client_key) {
                easy.ssl_cert_type("PEM")?;
                easy.ssl_cert_blob(cert)?;
                easy.ssl_key_type("PEM")?;
                easy.ssl_key_blob(key)?;
            }
            if let Some(password) = s.key_password {
                easy.key_password(password)?;
            }
            Ok(())
        })()
        .map_err(ConfigError::TlsBackend)
    }
}
