//! Configuration types for directory servers, pools, and the engine.
//!
//! # Module Structure
//! - `server`: Per-server connection configuration ([`ServerConfig`], [`TlsMode`])
//! - `pool`: Pool sizing and health-check policy ([`PoolOptions`])
//! - `engine`: Engine-wide settings and environment overrides ([`EngineConfig`])

mod engine;
mod pool;
mod server;

pub use engine::{
    BrowseOptions, ENV_HEALTH_CHECK_INTERVAL_SECS, ENV_MAX_CONNECTION_AGE_SECS, ENV_PAGE_SIZE,
    ENV_POOL_MAX_SIZE, ENV_PREFETCH_SCHEMA, EngineConfig,
};
pub use pool::{HealthCheckPolicy, PoolOptions};
pub use server::{ServerConfig, TlsMode};
