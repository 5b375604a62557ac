//! Connection and query engine for LDAP-style directory servers.
//!
//! This crate sits between a directory browsing application and a
//! directory client library. It owns pooled connections per server,
//! retries read operations across transient faults, turns forward-only
//! paging cookies into random-access pages, caches per-server schemas and
//! captures rejected certificate chains for trust decisions.
//!
//! # Security Guarantees
//! - Bind secrets are zeroed on drop and never logged or displayed
//! - Certificate validation is on by default for secure transports
//! - A rejected certificate is never trusted implicitly; it is captured for
//!   an explicit decision
//!
//! # Architecture
//! The engine follows these patterns:
//! - Directory access behind the object-safe [`client::DirectoryConnector`]
//!   and [`client::DirectoryConnection`] traits
//! - One pool per server, built at most once under concurrent demand
//! - Shared registries in concurrent maps, never locked across an await
//! - Comprehensive error handling with credential-free messages

pub mod activity;
pub mod browse;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod pool;
pub mod retry;
pub mod schema;
pub mod security;

// Re-export commonly used types
pub use activity::{ActivityKind, ActivityLog, ActivityRecord, MemoryActivityLog, TracingActivityLog};
pub use client::{DirectoryConnection, DirectoryConnector};
pub use config::{BrowseOptions, EngineConfig, HealthCheckPolicy, PoolOptions, ServerConfig, TlsMode};
pub use engine::{DirectoryEngine, DirectoryEngineBuilder};
pub use error::{DirectoryError, FaultCategory, ResultCode, RetryableErrorClass, Result};
pub use models::{
    BrowseEntry, BrowsePage, Control, Entry, Modification, ModifyOperation, RootDse,
    SearchRequest, SearchResult, SearchScope,
};
pub use pool::PoolStats;
pub use schema::{Schema, SchemaSnapshot};
pub use security::{
    BindCredentials, CapturedCertificateFailure, CertificateChain, InMemoryTrustStore, TrustStore,
};
