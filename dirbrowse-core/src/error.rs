//! Error types and fault classification for directory operations.
//!
//! Every failure the engine surfaces falls into one of three buckets so a
//! caller can decide between "offer a retry", "show a trust dialog" and
//! "show the message":
//!
//! - **Connection faults** are transient and worth one pool rebuild
//!   ([`RetryableErrorClass`]).
//! - **Trust faults** carry the certificate chain the server presented.
//! - **Semantic faults** are terminal and propagated untouched.
//!
//! Bind secrets never appear in any message produced here.

use crate::models::Entry;
use crate::security::CertificateChain;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory protocol result codes, including the client-side codes most
/// directory SDKs synthesize for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// Operation succeeded (0)
    Success,
    /// Server-side operations error (1)
    OperationsError,
    /// Malformed request (2)
    ProtocolError,
    /// Time limit exceeded (3)
    TimeLimitExceeded,
    /// Size limit exceeded (4)
    SizeLimitExceeded,
    /// Authentication method not supported (7)
    AuthMethodNotSupported,
    /// Stronger authentication required (8)
    StrongerAuthRequired,
    /// Administrative limit exceeded (11)
    AdminLimitExceeded,
    /// Critical control not supported (12)
    UnavailableCriticalExtension,
    /// No such attribute (16)
    NoSuchAttribute,
    /// Undefined attribute type (17)
    UndefinedAttributeType,
    /// Invalid attribute syntax (21)
    InvalidAttributeSyntax,
    /// Attribute or value already exists (20)
    AttributeOrValueExists,
    /// No such object (32)
    NoSuchObject,
    /// Invalid DN syntax (34)
    InvalidDnSyntax,
    /// Invalid credentials (49)
    InvalidCredentials,
    /// Insufficient access rights (50)
    InsufficientAccessRights,
    /// Server busy (51)
    Busy,
    /// Server unavailable (52)
    Unavailable,
    /// Server unwilling to perform (53)
    UnwillingToPerform,
    /// Object class violation (65)
    ObjectClassViolation,
    /// Operation not allowed on a non-leaf entry (66)
    NotAllowedOnNonLeaf,
    /// Entry already exists (68)
    EntryAlreadyExists,
    /// Client-side: the server could not be reached (81)
    ServerDown,
    /// Client-side: local failure in the client library (82)
    LocalError,
    /// Client-side: request could not be encoded (83)
    EncodingError,
    /// Client-side: response could not be decoded (84)
    DecodingError,
    /// Client-side: the operation timed out (85)
    Timeout,
    /// Client-side: malformed search filter (87)
    FilterError,
    /// Client-side: connection could not be established (91)
    ConnectError,
    /// Any other code
    Other(u32),
}

impl ResultCode {
    /// Maps a numeric result code onto the enumeration.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::OperationsError,
            2 => Self::ProtocolError,
            3 => Self::TimeLimitExceeded,
            4 => Self::SizeLimitExceeded,
            7 => Self::AuthMethodNotSupported,
            8 => Self::StrongerAuthRequired,
            11 => Self::AdminLimitExceeded,
            12 => Self::UnavailableCriticalExtension,
            16 => Self::NoSuchAttribute,
            17 => Self::UndefinedAttributeType,
            21 => Self::InvalidAttributeSyntax,
            20 => Self::AttributeOrValueExists,
            32 => Self::NoSuchObject,
            34 => Self::InvalidDnSyntax,
            49 => Self::InvalidCredentials,
            50 => Self::InsufficientAccessRights,
            51 => Self::Busy,
            52 => Self::Unavailable,
            53 => Self::UnwillingToPerform,
            65 => Self::ObjectClassViolation,
            66 => Self::NotAllowedOnNonLeaf,
            68 => Self::EntryAlreadyExists,
            81 => Self::ServerDown,
            82 => Self::LocalError,
            83 => Self::EncodingError,
            84 => Self::DecodingError,
            85 => Self::Timeout,
            87 => Self::FilterError,
            91 => Self::ConnectError,
            other => Self::Other(other),
        }
    }

    /// Returns the numeric value of this result code.
    pub fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::OperationsError => 1,
            Self::ProtocolError => 2,
            Self::TimeLimitExceeded => 3,
            Self::SizeLimitExceeded => 4,
            Self::AuthMethodNotSupported => 7,
            Self::StrongerAuthRequired => 8,
            Self::AdminLimitExceeded => 11,
            Self::UnavailableCriticalExtension => 12,
            Self::NoSuchAttribute => 16,
            Self::UndefinedAttributeType => 17,
            Self::AttributeOrValueExists => 20,
            Self::InvalidAttributeSyntax => 21,
            Self::NoSuchObject => 32,
            Self::InvalidDnSyntax => 34,
            Self::InvalidCredentials => 49,
            Self::InsufficientAccessRights => 50,
            Self::Busy => 51,
            Self::Unavailable => 52,
            Self::UnwillingToPerform => 53,
            Self::ObjectClassViolation => 65,
            Self::NotAllowedOnNonLeaf => 66,
            Self::EntryAlreadyExists => 68,
            Self::ServerDown => 81,
            Self::LocalError => 82,
            Self::EncodingError => 83,
            Self::DecodingError => 84,
            Self::Timeout => 85,
            Self::FilterError => 87,
            Self::ConnectError => 91,
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "result code {}", code),
            known => write!(f, "{:?} ({})", known, known.code()),
        }
    }
}

/// The closed set of failures worth one pool rebuild and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryableErrorClass {
    /// Server unreachable or connection dropped
    ServerUnreachable,
    /// Connection could not be established
    ConnectError,
    /// Server reported itself unavailable
    ServiceUnavailable,
    /// Operation timed out
    Timeout,
    /// Response could not be decoded
    DecodeError,
}

impl RetryableErrorClass {
    /// Classifies a result code, returning `None` for terminal codes.
    pub fn from_result_code(code: ResultCode) -> Option<Self> {
        match code {
            ResultCode::ServerDown => Some(Self::ServerUnreachable),
            ResultCode::ConnectError => Some(Self::ConnectError),
            ResultCode::Unavailable => Some(Self::ServiceUnavailable),
            ResultCode::Timeout => Some(Self::Timeout),
            ResultCode::DecodingError => Some(Self::DecodeError),
            _ => None,
        }
    }
}

/// Which taxonomy bucket an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCategory {
    /// Transient; retried once after rebuilding the pool
    Connection,
    /// Certificate or handshake rejection; needs a trust decision
    Trust,
    /// Terminal; the request itself is wrong or not permitted
    Semantic,
}

/// Whether a TLS handshake failed on the certificate or on the handshake
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeFailureKind {
    /// Certificate chain was rejected
    Certificate,
    /// Handshake failed for another reason
    Handshake,
}

impl std::fmt::Display for HandshakeFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Certificate => write!(f, "certificate"),
            Self::Handshake => write!(f, "handshake"),
        }
    }
}

/// Raised by directory clients when a secure handshake is rejected.
///
/// Clients may return it directly or nest it anywhere in the `source()`
/// chain of a protocol error; the engine finds it either way.
#[derive(Debug, Clone, Error)]
#[error("TLS {kind} failure: {message}")]
pub struct TlsHandshakeError {
    /// Whether the certificate or the handshake failed
    pub kind: HandshakeFailureKind,
    /// Message from the TLS layer
    pub message: String,
    /// Chain the server presented, when the client managed to capture it
    pub presented_chain: Option<CertificateChain>,
}

impl TlsHandshakeError {
    /// Creates a certificate rejection.
    pub fn certificate(message: impl Into<String>, chain: Option<CertificateChain>) -> Self {
        Self {
            kind: HandshakeFailureKind::Certificate,
            message: message.into(),
            presented_chain: chain,
        }
    }

    /// Creates a generic handshake failure.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self {
            kind: HandshakeFailureKind::Handshake,
            message: message.into(),
            presented_chain: None,
        }
    }
}

/// Main error type for directory engine operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory (or the client library on its behalf) reported a failure
    #[error("Directory operation failed with {code}: {message}")]
    Protocol {
        code: ResultCode,
        message: String,
        /// Entries returned before the server cut the operation off
        partial_entries: Vec<Entry>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A secure handshake failed; the rejected chain needs a trust decision
    #[error("Certificate validation failed for server '{server}'")]
    CertificateValidation {
        server: String,
        chain: Option<CertificateChain>,
    },

    /// Handshake rejection reported directly by a client
    #[error(transparent)]
    TlsHandshake(#[from] TlsHandshakeError),

    /// The pool was closed while the operation was using it
    #[error("Connection pool for server '{server}' is closed")]
    PoolClosed { server: String },

    /// Schema data could not be interpreted
    #[error("Schema processing failed: {context}")]
    Schema { context: String },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Convenience type alias for Results with DirectoryError
pub type Result<T> = std::result::Result<T, DirectoryError>;

impl DirectoryError {
    /// Creates a protocol error with a diagnostic message.
    pub fn protocol(code: ResultCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            partial_entries: Vec::new(),
            source: None,
        }
    }

    /// Creates a protocol error caused by another error.
    pub fn protocol_caused_by<E>(code: ResultCode, message: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Protocol {
            code,
            message: message.into(),
            partial_entries: Vec::new(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a size-limit failure carrying whatever the server returned.
    pub fn size_limit_exceeded(partial_entries: Vec<Entry>) -> Self {
        Self::Protocol {
            code: ResultCode::SizeLimitExceeded,
            message: "Size limit exceeded".to_string(),
            partial_entries,
            source: None,
        }
    }

    /// Creates a client-side timeout.
    pub fn timeout(context: impl Into<String>) -> Self {
        Self::protocol(ResultCode::Timeout, context)
    }

    /// Creates a schema processing error.
    pub fn schema(context: impl Into<String>) -> Self {
        Self::Schema {
            context: context.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the protocol result code, if this is a protocol error.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Classifies the error against the retryable set.
    ///
    /// A closed pool is treated like an unreachable server: another caller
    /// discarded it mid-operation and a fresh pool is the remedy.
    pub fn retryable_class(&self) -> Option<RetryableErrorClass> {
        match self {
            Self::Protocol { code, .. } => RetryableErrorClass::from_result_code(*code),
            Self::PoolClosed { .. } => Some(RetryableErrorClass::ServerUnreachable),
            _ => None,
        }
    }

    /// Whether the retry executor should rebuild the pool and try again.
    pub fn is_retryable(&self) -> bool {
        self.retryable_class().is_some()
    }

    /// Returns the taxonomy bucket for this error.
    pub fn category(&self) -> FaultCategory {
        if self.handshake_failure().is_some()
            || matches!(self, Self::CertificateValidation { .. })
        {
            FaultCategory::Trust
        } else if self.is_retryable() {
            FaultCategory::Connection
        } else {
            FaultCategory::Semantic
        }
    }

    /// Finds a TLS handshake rejection anywhere in the cause chain.
    pub fn handshake_failure(&self) -> Option<&TlsHandshakeError> {
        if let Self::TlsHandshake(failure) = self {
            return Some(failure);
        }
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            if let Some(failure) = err.downcast_ref::<TlsHandshakeError>() {
                return Some(failure);
            }
            cause = err.source();
        }
        None
    }

    /// Short human-readable summary suitable for a status line.
    pub fn summary(&self) -> String {
        match self {
            Self::Protocol {
                code: ResultCode::InvalidCredentials,
                ..
            } => "Invalid credentials: check the bind DN and password".to_string(),
            Self::Protocol {
                code: ResultCode::Unavailable,
                ..
            } => "Server unavailable: the directory is not accepting requests".to_string(),
            Self::Protocol {
                code: ResultCode::Timeout,
                ..
            } => "Operation timed out: the server did not respond in time".to_string(),
            Self::Protocol { code, message, .. } => {
                format!("Directory error ({}): {}", code.code(), message)
            }
            Self::CertificateValidation { server, .. } => {
                format!("The certificate presented by '{}' is not trusted", server)
            }
            other => other.to_string(),
        }
    }
}
