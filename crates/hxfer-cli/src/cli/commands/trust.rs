//! Trust options shared by `get` and `put`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use hxfer_core::{TrustMode, TrustPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TrustArg {
    /// Platform trust store and hostname check.
    Default,
    /// Accept any certificate and hostname.
    Skip,
    /// Platform trust store, no hostname check.
    ClientOnly,
    /// Trust only the certificate given with --ca-cert.
    Pinned,
    /// Client identity plus a private trust store.
    Mutual,
}

#[derive(Debug, Clone, Args)]
pub struct TrustArgs {
    /// TLS verification mode.
    #[arg(long, value_enum, default_value_t = TrustArg::Default)]
    pub trust: TrustArg,

    /// Certificate (PEM or DER) for `--trust pinned`.
    #[arg(long, value_name = "PATH")]
    pub ca_cert: Option<PathBuf>,

    /// PEM bundle with client certificate and private key for `--trust mutual`.
    #[arg(long, value_name = "PATH")]
    pub client_identity: Option<PathBuf>,

    /// Password of an encrypted client key.
    #[arg(long, value_name = "PASS")]
    pub client_password: Option<String>,

    /// PEM bundle of trusted server certificates for `--trust mutual`.
    #[arg(long, value_name = "PATH")]
    pub trust_store: Option<PathBuf>,
}

impl TrustArgs {
    #[cfg(test)]
    pub fn mode(&self) -> TrustMode {
        match self.trust {
            TrustArg::Default => TrustMode::Default,
            TrustArg::Skip => TrustMode::Skip,
            TrustArg::ClientOnly => TrustMode::ClientOnly,
            TrustArg::Pinned => TrustMode::ClientWithPinnedCert,
            TrustArg::Mutual => TrustMode::Mutual,
        }
    }

    /// Reads the referenced files and builds the policy.
    pub fn policy(&self) -> Result<TrustPolicy> {
        let policy = match self.trust {
            TrustArg::Default => TrustPolicy::Default,
            TrustArg::Skip => TrustPolicy::Skip,
            TrustArg::ClientOnly => TrustPolicy::ClientOnly,
            TrustArg::Pinned => {
                let Some(path) = self.ca_cert.as_deref() else {
                    bail!("--trust pinned requires --ca-cert");
                };
                TrustPolicy::pinned_cert(&read(path)?)
                    .with_context(|| format!("invalid certificate {}", path.display()))?
            }
            TrustArg::Mutual => {
                let (Some(identity), Some(store)) =
                    (self.client_identity.as_deref(), self.trust_store.as_deref())
                else {
                    bail!("--trust mutual requires --client-identity and --trust-store");
                };
                TrustPolicy::mutual(
                    &read(identity)?,
                    self.client_password.as_deref(),
                    &read(store)?,
                )
                .context("invalid mutual TLS material")?
            }
        };
        if policy.mode() == TrustMode::Skip {
            tracing::warn!("TLS verification disabled");
        }
        Ok(policy)
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}
