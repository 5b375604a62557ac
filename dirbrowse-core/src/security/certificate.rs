//! Certificate chains presented by directory servers.
//!
//! The engine never parses certificates; it carries the DER bytes the
//! client captured, plus whatever subject/issuer text the client could
//! extract, so a trust dialog can show them.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One certificate from a presented chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// DER encoding
    pub der: Vec<u8>,
    /// Subject DN, when known
    pub subject: Option<String>,
    /// Issuer DN, when known
    pub issuer: Option<String>,
}

impl Certificate {
    /// Wraps raw DER bytes.
    pub fn from_der(der: Vec<u8>) -> Self {
        Self {
            der,
            subject: None,
            issuer: None,
        }
    }

    /// Builder method to attach display names.
    pub fn with_names(mut self, subject: impl Into<String>, issuer: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.issuer = Some(issuer.into());
        self
    }

    /// SHA-256 fingerprint as colon-separated uppercase hex.
    pub fn sha256_fingerprint(&self) -> String {
        Sha256::digest(&self.der)
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// PEM encoding with 64-column lines.
    pub fn to_pem(&self) -> String {
        let encoded = STANDARD.encode(&self.der);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for line in encoded.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }
}

/// A chain as presented by the server, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateChain {
    /// Certificates, leaf first
    pub certificates: Vec<Certificate>,
}

impl CertificateChain {
    /// Creates a chain, leaf first.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// The server's own certificate.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Concatenated PEM blocks, ready to hand to a trust store.
    pub fn to_pem(&self) -> String {
        self.certificates.iter().map(Certificate::to_pem).collect()
    }
}
