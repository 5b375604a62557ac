//! Opening and initializing individual directory connections.
//!
//! # Connection Sequence
//! 1. Transport connect (implicit TLS handshake for ldaps)
//! 2. StartTLS upgrade when configured
//! 3. Simple bind when credentials are supplied
//!
//! The whole sequence runs under the server's connect timeout. A connection
//! that fails part-way is closed before the error is returned, and a
//! rejected handshake is turned into
//! [`DirectoryError::CertificateValidation`] carrying the presented chain.

use crate::client::{DirectoryConnection, DirectoryConnector};
use crate::config::{ServerConfig, TlsMode};
use crate::error::{DirectoryError, ResultCode};
use crate::security::{
    CapturedCertificateFailure, CertificateChain, CertificateVerification, TrustStore,
};
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Builds fully initialized connections for pools.
#[derive(Clone)]
pub struct ConnectionFactory {
    connector: Arc<dyn DirectoryConnector>,
    trust: Arc<dyn TrustStore>,
    captures: Arc<DashMap<String, CapturedCertificateFailure>>,
}

impl ConnectionFactory {
    /// Creates a factory around a connector and trust collaborator.
    pub fn new(connector: Arc<dyn DirectoryConnector>, trust: Arc<dyn TrustStore>) -> Self {
        Self {
            connector,
            trust,
            captures: Arc::new(DashMap::new()),
        }
    }

    /// The trust collaborator this factory reports to.
    pub fn trust_store(&self) -> &Arc<dyn TrustStore> {
        &self.trust
    }

    /// How certificates are checked for a server.
    ///
    /// Validation is skipped for cleartext servers and for servers whose
    /// config disables it.
    pub fn verification_for(&self, server: &ServerConfig) -> CertificateVerification {
        if server.tls.is_secure() && server.validate_certificate {
            CertificateVerification::Validate(Arc::clone(&self.trust))
        } else {
            CertificateVerification::TrustAll
        }
    }

    /// Opens, upgrades and binds a connection.
    ///
    /// # Errors
    /// Returns [`DirectoryError::CertificateValidation`] if the handshake was
    /// rejected, a timeout if the sequence exceeded the connect timeout, or
    /// the protocol error reported by the client otherwise
    pub async fn open(&self, server: &ServerConfig) -> Result<Box<dyn DirectoryConnection>> {
        let verification = self.verification_for(server);
        let result = match tokio::time::timeout(
            server.connect_timeout,
            self.establish(server, &verification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::timeout(format!(
                "Connecting to server '{}' exceeded {:?}",
                server.name, server.connect_timeout
            ))),
        };

        result.map_err(|error| self.classify_trust_failure(server, error))
    }

    async fn establish(
        &self,
        server: &ServerConfig,
        verification: &CertificateVerification,
    ) -> Result<Box<dyn DirectoryConnection>> {
        tracing::debug!(server = %server.name, tls = ?server.tls, "Opening directory connection");
        let connection = self.connector.connect(server, verification).await?;

        if let Err(error) = Self::initialize(connection.as_ref(), server, verification).await {
            if let Err(close_error) = connection.close().await {
                tracing::debug!(server = %server.name, error = %close_error, "Ignoring close failure");
            }
            return Err(error);
        }

        Ok(connection)
    }

    async fn initialize(
        connection: &dyn DirectoryConnection,
        server: &ServerConfig,
        verification: &CertificateVerification,
    ) -> Result<()> {
        if server.tls == TlsMode::StartTls {
            connection.start_tls(verification).await?;
        }

        if let Some(bind) = &server.bind {
            connection.bind(bind.dn(), bind.password()).await?;
        }

        Ok(())
    }

    /// Turns a handshake rejection into a trust fault and records the
    /// captured chain; other errors pass through untouched.
    ///
    /// The chain carried by this handshake wins and overwrites whatever the
    /// trust store remembered, so a rotated certificate is never reported
    /// with its predecessor's chain. The store is only consulted when the
    /// client could not attach a chain to the error.
    fn classify_trust_failure(&self, server: &ServerConfig, error: DirectoryError) -> DirectoryError {
        let Some(failure) = error.handshake_failure() else {
            return error;
        };

        let chain = match failure.presented_chain.clone() {
            Some(presented) => {
                self.trust.record_failure(&server.name, presented.clone());
                Some(presented)
            }
            None => self.trust.last_failed_chain(&server.name),
        };

        tracing::warn!(
            server = %server.name,
            kind = %failure.kind,
            chain_length = chain.as_ref().map_or(0, CertificateChain::len),
            "Secure handshake rejected"
        );

        self.captures.insert(
            server.name.clone(),
            CapturedCertificateFailure {
                server: server.name.clone(),
                chain: chain.clone(),
                captured_at: chrono::Utc::now(),
            },
        );

        DirectoryError::CertificateValidation {
            server: server.name.clone(),
            chain,
        }
    }

    /// Last captured trust failure for a server.
    pub fn captured_failure(&self, server: &str) -> Option<CapturedCertificateFailure> {
        self.captures.get(server).map(|capture| capture.value().clone())
    }

    /// Forgets the captured failure, locally and in the trust collaborator.
    pub fn clear_captured_failure(&self, server: &str) {
        self.captures.remove(server);
        self.trust.clear_failure(server);
    }

    /// Connects with an always-trusting verifier purely to read the chain
    /// the server presents. No bind is performed.
    ///
    /// # Errors
    /// Returns a configuration error for cleartext servers, or the protocol
    /// error from connecting
    pub async fn capture_presented_chain(&self, server: &ServerConfig) -> Result<CertificateChain> {
        if !server.tls.is_secure() {
            return Err(DirectoryError::configuration(format!(
                "Server '{}' does not use TLS; there is no certificate to retrieve",
                server.name
            )));
        }

        let verification = CertificateVerification::TrustAll;
        let capture = async {
            let connection = self.connector.connect(server, &verification).await?;
            let upgraded = if server.tls == TlsMode::StartTls {
                connection.start_tls(&verification).await
            } else {
                Ok(())
            };
            let chain = connection.peer_certificates();
            if let Err(error) = connection.close().await {
                tracing::debug!(server = %server.name, error = %error, "Ignoring close failure");
            }
            upgraded?;
            Ok::<_, DirectoryError>(chain)
        };

        let chain = match tokio::time::timeout(server.connect_timeout, capture).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DirectoryError::timeout(format!(
                    "Retrieving the certificate of server '{}' exceeded {:?}",
                    server.name, server.connect_timeout
                )));
            }
        };

        match chain {
            Some(chain) if !chain.is_empty() => Ok(chain),
            _ => Err(DirectoryError::protocol(
                ResultCode::LocalError,
                format!("Server '{}' did not present a certificate chain", server.name),
            )),
        }
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("captures", &self.captures.len())
            .finish_non_exhaustive()
    }
}
