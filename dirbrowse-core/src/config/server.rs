//! Directory server connection configuration.
//!
//! This module provides the `ServerConfig` struct describing one logical
//! directory server. The server name is the key for every per-server
//! registry in the engine (pools, schema snapshots, paging cursors).

use crate::security::BindCredentials;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

/// Transport security for a directory connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsMode {
    /// Cleartext connection
    #[default]
    Plain,
    /// TLS from the first byte (ldaps)
    Ldaps,
    /// Cleartext connection upgraded with the StartTLS extended operation
    StartTls,
}

impl TlsMode {
    /// Conventional port for the mode.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Plain | Self::StartTls => 389,
            Self::Ldaps => 636,
        }
    }

    /// Whether the connection ends up encrypted.
    pub fn is_secure(self) -> bool {
        !matches!(self, Self::Plain)
    }
}

/// Configuration for one directory server.
///
/// # Security
/// The bind secret is held in [`BindCredentials`] and is skipped when the
/// config is serialized; `Display` omits the bind identity entirely.
///
/// # Example
/// ```rust
/// use dirbrowse_core::config::{ServerConfig, TlsMode};
/// use dirbrowse_core::security::BindCredentials;
///
/// let config = ServerConfig::new("corp", "ldap.example.com")
///     .with_tls(TlsMode::Ldaps)
///     .with_bind(BindCredentials::new("cn=reader,dc=example,dc=com", "secret"));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.port, 636);
/// assert_eq!(config.url().unwrap().as_str(), "ldaps://ldap.example.com:636");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical server name, unique per engine
    pub name: String,
    /// Directory host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Transport security
    pub tls: TlsMode,
    /// Optional bind identity; anonymous when absent
    #[serde(skip)]
    pub bind: Option<BindCredentials>,
    /// Whether the server certificate must validate against trust material
    pub validate_certificate: bool,
    /// Time allowed for connect, TLS negotiation and bind
    pub connect_timeout: Duration,
    /// Time allowed for each individual directory operation
    pub operation_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server config with safe defaults.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: TlsMode::Plain.default_port(),
            tls: TlsMode::Plain,
            bind: None,
            validate_certificate: true,
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
        }
    }

    /// Builder method to set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set the TLS mode; moves a default port along with it.
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        if self.port == self.tls.default_port() {
            self.port = tls.default_port();
        }
        self.tls = tls;
        self
    }

    /// Builder method to set bind credentials.
    pub fn with_bind(mut self, bind: BindCredentials) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Builder method to toggle certificate validation.
    pub fn with_certificate_validation(mut self, validate: bool) -> Self {
        self.validate_certificate = validate;
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the per-operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Connection URL without credentials.
    ///
    /// # Errors
    /// Returns error if the host cannot form a valid URL
    pub fn url(&self) -> crate::Result<Url> {
        let scheme = match self.tls {
            TlsMode::Ldaps => "ldaps",
            TlsMode::Plain | TlsMode::StartTls => "ldap",
        };
        Url::parse(&format!("{}://{}:{}", scheme, self.url_host(), self.port)).map_err(|e| {
            crate::error::DirectoryError::configuration(format!(
                "Invalid directory URL for server '{}': {}",
                self.name, e
            ))
        })
    }

    /// Host as it appears in a URL authority; IPv6 literals get brackets.
    fn url_host(&self) -> Cow<'_, str> {
        let host = self.host.trim();
        if host.contains(':') && !host.starts_with('[') {
            Cow::Owned(format!("[{}]", host))
        } else {
            Cow::Borrowed(host)
        }
    }

    /// Validates server configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::error::DirectoryError::configuration(
                "server name cannot be empty",
            ));
        }

        if self.host.trim().is_empty() {
            return Err(crate::error::DirectoryError::configuration(
                "host cannot be empty",
            ));
        }

        if self.port == 0 {
            return Err(crate::error::DirectoryError::configuration(
                "port must be greater than 0",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(crate::error::DirectoryError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.operation_timeout.is_zero() {
            return Err(crate::error::DirectoryError::configuration(
                "operation_timeout must be greater than 0",
            ));
        }

        if let Some(bind) = &self.bind
            && bind.dn().trim().is_empty()
        {
            return Err(crate::error::DirectoryError::configuration(
                "bind DN cannot be empty when credentials are supplied",
            ));
        }

        self.url()?;
        Ok(())
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.tls {
            TlsMode::Ldaps => "ldaps",
            TlsMode::Plain | TlsMode::StartTls => "ldap",
        };
        write!(f, "{} ({}://{}:{}", self.name, scheme, self.url_host(), self.port)?;
        if self.tls == TlsMode::StartTls {
            write!(f, " +StartTLS")?;
        }
        // Intentionally omit the bind identity
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::new("corp", "ldap.example.com");
        assert_eq!(config.port, 389);
        assert_eq!(config.tls, TlsMode::Plain);
        assert!(config.bind.is_none());
        assert!(config.validate_certificate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_mode_moves_default_port_only() {
        let config = ServerConfig::new("corp", "ldap.example.com").with_tls(TlsMode::Ldaps);
        assert_eq!(config.port, 636);

        let config = ServerConfig::new("corp", "ldap.example.com")
            .with_port(10389)
            .with_tls(TlsMode::Ldaps);
        assert_eq!(config.port, 10389);

        let config = ServerConfig::new("corp", "ldap.example.com").with_tls(TlsMode::StartTls);
        assert_eq!(config.port, 389);
        assert!(config.tls.is_secure());
    }

    #[test]
    fn test_server_config_validation() {
        assert!(ServerConfig::new("", "ldap.example.com").validate().is_err());
        assert!(ServerConfig::new("corp", " ").validate().is_err());
        assert!(
            ServerConfig::new("corp", "ldap.example.com")
                .with_port(0)
                .validate()
                .is_err()
        );
        assert!(
            ServerConfig::new("corp", "ldap.example.com")
                .with_operation_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ServerConfig::new("corp", "ldap.example.com")
                .with_bind(BindCredentials::new("", "secret"))
                .validate()
                .is_err()
        );
        assert!(
            ServerConfig::new("corp", "bad host name")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_server_config_ipv6_host() {
        let config = ServerConfig::new("v6", "::1");
        assert!(config.validate().is_ok());
        assert_eq!(config.url().unwrap().as_str(), "ldap://[::1]:389");
        assert!(format!("{}", config).contains("ldap://[::1]:389"));

        let config = ServerConfig::new("v6", "[2001:db8::10]").with_tls(TlsMode::Ldaps);
        assert_eq!(config.url().unwrap().as_str(), "ldaps://[2001:db8::10]:636");

        assert!(ServerConfig::new("v6", "fe80::1::2").validate().is_err());
    }

    #[test]
    fn test_server_config_display_no_credentials() {
        let config = ServerConfig::new("corp", "ldap.example.com")
            .with_tls(TlsMode::StartTls)
            .with_bind(BindCredentials::new("cn=admin,dc=example", "s3cret"));

        let display = format!("{}", config);
        assert!(display.contains("ldap.example.com:389"));
        assert!(display.contains("StartTLS"));
        assert!(!display.contains("cn=admin"));
        assert!(!display.contains("s3cret"));
    }

    #[test]
    fn test_server_config_serialization_skips_bind() {
        let config = ServerConfig::new("corp", "ldap.example.com")
            .with_bind(BindCredentials::new("cn=admin,dc=example", "s3cret"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("cn=admin"));

        let parsed: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "corp");
        assert!(parsed.bind.is_none());
    }
}
