//! PEM/DER parsing for pinned certificates and keystores.

use pem::Pem;

use crate::error::ConfigError;

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const KEY_TAGS: [&str; 4] = [
    "PRIVATE KEY",
    "RSA PRIVATE KEY",
    "EC PRIVATE KEY",
    "ENCRYPTED PRIVATE KEY",
];

/// DER SEQUENCE tag; every X.509 certificate starts with it.
const DER_SEQUENCE: u8 = 0x30;

fn looks_like_pem(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| &bytes[i..])
        .unwrap_or(&[]);
    trimmed.starts_with(b"-----BEGIN")
}

pub(super) fn parse_blocks(bytes: &[u8], what: &'static str) -> Result<Vec<Pem>, ConfigError> {
    pem::parse_many(bytes).map_err(|source| ConfigError::Pem { what, source })
}

fn check_der(block: &Pem, what: &'static str) -> Result<(), ConfigError> {
    match block.contents().first() {
        Some(&DER_SEQUENCE) => Ok(()),
        _ => Err(ConfigError::NotACertificate { what }),
    }
}

/// All certificate blocks in `blocks`, each checked to be DER.
pub(super) fn certificates(blocks: &[Pem], what: &'static str) -> Result<Vec<Pem>, ConfigError> {
    let certs: Vec<Pem> = blocks
        .iter()
        .filter(|b| b.tag() == CERTIFICATE_TAG)
        .cloned()
        .collect();
    if certs.is_empty() {
        return Err(ConfigError::MissingCertificate { what });
    }
    for cert in &certs {
        check_der(cert, what)?;
    }
    Ok(certs)
}

/// Exactly one certificate, given as PEM or raw DER.
pub(super) fn single_certificate(bytes: &[u8], what: &'static str) -> Result<Pem, ConfigError> {
    let mut certs = if looks_like_pem(bytes) {
        certificates(&parse_blocks(bytes, what)?, what)?
    } else {
        if bytes.is_empty() {
            return Err(ConfigError::MissingCertificate { what });
        }
        let block = Pem::new(CERTIFICATE_TAG, bytes.to_vec());
        check_der(&block, what)?;
        vec![block]
    };
    if certs.len() != 1 {
        return Err(ConfigError::TooManyCertificates {
            what,
            found: certs.len(),
        });
    }
    Ok(certs.remove(0))
}

/// The single private key block in `blocks`.
pub(super) fn private_key(blocks: &[Pem]) -> Result<Pem, ConfigError> {
    let mut keys: Vec<Pem> = blocks
        .iter()
        .filter(|b| KEY_TAGS.contains(&b.tag()))
        .cloned()
        .collect();
    match keys.len() {
        0 => Err(ConfigError::MissingPrivateKey),
        1 => Ok(keys.remove(0)),
        n => Err(ConfigError::TooManyPrivateKeys(n)),
    }
}

/// PKCS#8 encrypted keys use their own tag; legacy OpenSSL keys carry a Proc-Type header.
pub(super) fn is_encrypted(key: &Pem) -> bool {
    key.tag() == "ENCRYPTED PRIVATE KEY"
        || key
            .headers()
            .get("Proc-Type")
            .map(|v| v.contains("ENCRYPTED"))
            .unwrap_or(false)
}

pub(super) fn encode(blocks: &[Pem]) -> Vec<u8> {
    pem::encode_many(blocks).into_bytes()
}
