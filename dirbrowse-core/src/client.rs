//! Directory client capability consumed by the engine.
//!
//! The engine never speaks the wire protocol itself. It calls through these
//! two object-safe traits, so any transport (or a fake one in tests) can be
//! plugged in behind `Arc<dyn DirectoryConnector>`.
//!
//! # Error Contract
//! Implementations report failures as [`crate::DirectoryError::Protocol`]
//! with the closest [`crate::error::ResultCode`]. A rejected TLS handshake
//! should be reported as, or caused by, a [`crate::error::TlsHandshakeError`]
//! so the engine can turn it into a trust decision. A search cut off by a
//! server size limit should use
//! [`crate::DirectoryError::size_limit_exceeded`] with the entries that were
//! returned before the cut-off.

use crate::Result;
use crate::config::ServerConfig;
use crate::models::{Entry, Modification, RootDse, SearchRequest, SearchResult};
use crate::security::{CertificateChain, CertificateVerification};
use async_trait::async_trait;

/// Control OID for the extended schema-info request.
pub const EXTENDED_SCHEMA_INFO_CONTROL: &str = "1.3.6.1.4.1.36733.2.1.5.12";

/// Control OID for simple paged results.
pub const PAGED_RESULTS_CONTROL: &str = "1.2.840.113556.1.4.319";

/// Opens connections to a directory server.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens a transport-level connection, performing the implicit TLS
    /// handshake when the server uses ldaps.
    ///
    /// # Errors
    /// Returns a protocol error if the server cannot be reached, or a
    /// handshake failure if the presented certificate is rejected
    async fn connect(
        &self,
        config: &ServerConfig,
        verification: &CertificateVerification,
    ) -> Result<Box<dyn DirectoryConnection>>;
}

/// One open connection to a directory server.
///
/// All methods take `&self`; implementations serialize access internally
/// if their transport requires it.
#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    /// Upgrades a cleartext connection with the StartTLS extended operation.
    async fn start_tls(&self, verification: &CertificateVerification) -> Result<()>;

    /// Simple bind with a DN and password.
    async fn bind(&self, dn: &str, password: &str) -> Result<()>;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult>;

    async fn modify(&self, dn: &str, modifications: &[Modification]) -> Result<()>;

    async fn add(&self, entry: &Entry) -> Result<()>;

    async fn delete(&self, dn: &str) -> Result<()>;

    /// Reads the root DSE. Also used as the cheap health-check request.
    async fn root_info(&self) -> Result<RootDse>;

    /// Reads the raw subschema entry using the client's standard fetch.
    async fn schema(&self) -> Result<Entry>;

    /// Whether the server advertises support for a control.
    async fn is_control_supported(&self, oid: &str) -> Result<bool>;

    /// Chain the server presented during the TLS handshake, if any.
    fn peer_certificates(&self) -> Option<CertificateChain>;

    /// Sends an unbind and releases the transport. Errors are ignored by
    /// the engine.
    async fn close(&self) -> Result<()>;
}
