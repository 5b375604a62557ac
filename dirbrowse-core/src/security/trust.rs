//! Trust decisions for secure directory connections.
//!
//! The engine does not own a trust store. It consumes a [`TrustStore`]
//! collaborator that supplies trust material for validating connectors and
//! remembers the last chain each server had rejected, so a human can decide
//! whether to trust it and retry.

use super::certificate::CertificateChain;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Location of a trust store and the passphrase that unlocks it.
#[derive(Clone)]
pub struct TrustMaterial {
    /// Trust store file
    pub path: PathBuf,
    passphrase: Zeroizing<String>,
}

impl TrustMaterial {
    /// Creates trust material from a path and passphrase.
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    /// Gets the passphrase. Only connectors should call this.
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustMaterial")
            .field("path", &self.path)
            .field("passphrase", &"****")
            .finish()
    }
}

/// Trust-decision collaborator.
///
/// Validating connectors call [`TrustStore::record_failure`] when they reject
/// a chain; the engine reads it back to build a
/// [`crate::DirectoryError::CertificateValidation`].
pub trait TrustStore: Send + Sync {
    /// Trust material used to construct validating connectors, if any.
    fn trust_material(&self) -> Option<TrustMaterial>;

    /// Remembers the chain a server presented during a failed handshake.
    fn record_failure(&self, server: &str, chain: CertificateChain);

    /// Last rejected chain for a server.
    fn last_failed_chain(&self, server: &str) -> Option<CertificateChain>;

    /// Forgets the rejected chain for a server.
    fn clear_failure(&self, server: &str);
}

/// In-memory [`TrustStore`] that remembers rejected chains per server.
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
    material: Option<TrustMaterial>,
    failures: DashMap<String, CertificateChain>,
}

impl InMemoryTrustStore {
    /// Creates a store without trust material.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to supply trust material.
    pub fn with_material(mut self, material: TrustMaterial) -> Self {
        self.material = Some(material);
        self
    }
}

impl TrustStore for InMemoryTrustStore {
    fn trust_material(&self) -> Option<TrustMaterial> {
        self.material.clone()
    }

    fn record_failure(&self, server: &str, chain: CertificateChain) {
        self.failures.insert(server.to_string(), chain);
    }

    fn last_failed_chain(&self, server: &str) -> Option<CertificateChain> {
        self.failures.get(server).map(|chain| chain.value().clone())
    }

    fn clear_failure(&self, server: &str) {
        self.failures.remove(server);
    }
}

/// How a connector should treat the server's certificate chain.
#[derive(Clone)]
pub enum CertificateVerification {
    /// Validate against the store's material and report rejected chains to it
    Validate(Arc<dyn TrustStore>),
    /// Accept any chain; used when validation is disabled and for capture
    TrustAll,
}

impl CertificateVerification {
    /// Whether any chain is accepted.
    pub fn is_trust_all(&self) -> bool {
        matches!(self, Self::TrustAll)
    }

    /// The trust collaborator, when validating.
    pub fn trust_store(&self) -> Option<&Arc<dyn TrustStore>> {
        match self {
            Self::Validate(store) => Some(store),
            Self::TrustAll => None,
        }
    }
}

impl std::fmt::Debug for CertificateVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validate(_) => write!(f, "CertificateVerification::Validate"),
            Self::TrustAll => write!(f, "CertificateVerification::TrustAll"),
        }
    }
}

/// The last chain a server had rejected, awaiting a trust decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedCertificateFailure {
    /// Server whose handshake failed
    pub server: String,
    /// Chain the server presented, if captured
    pub chain: Option<CertificateChain>,
    /// When the failure was captured
    pub captured_at: DateTime<Utc>,
}
