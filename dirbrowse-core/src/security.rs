//! Security utilities for bind credentials and certificate trust.
//!
//! This module provides:
//! - Bind credentials with automatic memory zeroing
//! - Certificate chains captured from failed or inspected handshakes
//! - The trust-decision collaborator interface and an in-memory default
//!
//! # Security Guarantees
//! - Bind secrets and trust-store passphrases live in `Zeroizing` containers
//! - Neither ever appears in `Debug` output, logs, or error messages
//!
//! # Module Structure
//! - `credentials`: Bind identity and secret
//! - `certificate`: Presented certificate chains, fingerprints, PEM rendering
//! - `trust`: Trust collaborator, verification modes, captured failures

mod certificate;
mod credentials;
mod trust;

// Re-export public types
pub use certificate::{Certificate, CertificateChain};
pub use credentials::BindCredentials;
pub use trust::{
    CapturedCertificateFailure, CertificateVerification, InMemoryTrustStore, TrustMaterial,
    TrustStore,
};
