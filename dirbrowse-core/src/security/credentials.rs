//! Bind credentials with automatic memory zeroing.
//!
//! # Security
//! - The bind secret is stored in a `Zeroizing` container
//! - Memory is cleared when the credentials go out of scope
//! - The secret never appears in `Debug` output or logs

use zeroize::{Zeroize, Zeroizing};

/// Bind identity (DN) and secret for simple authentication.
///
/// # Example
///
/// ```rust
/// use dirbrowse_core::security::BindCredentials;
///
/// let creds = BindCredentials::new("cn=admin,dc=example,dc=com", "secret");
/// assert_eq!(creds.dn(), "cn=admin,dc=example,dc=com");
/// assert!(!format!("{:?}", creds).contains("secret"));
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct BindCredentials {
    dn: Zeroizing<String>,
    password: Zeroizing<String>,
}

impl BindCredentials {
    /// Creates new bind credentials.
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: Zeroizing::new(dn.into()),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Gets the bind DN.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Gets the bind secret. Only directory clients should call this.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Checks if a non-empty secret is present without exposing it.
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

impl std::fmt::Debug for BindCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindCredentials")
            .field("dn", &self.dn.as_str())
            .field("password", &"****")
            .finish()
    }
}
