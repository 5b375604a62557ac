//! Engine-wide configuration.
//!
//! Settings can be built in code or read from `DIRBROWSE_*` environment
//! variables. Nothing is persisted to disk.

use super::pool::PoolOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable for the browse page size.
pub const ENV_PAGE_SIZE: &str = "DIRBROWSE_PAGE_SIZE";
/// Environment variable for the per-server pool upper bound.
pub const ENV_POOL_MAX_SIZE: &str = "DIRBROWSE_POOL_MAX_SIZE";
/// Environment variable for the health sweep interval, in seconds.
pub const ENV_HEALTH_CHECK_INTERVAL_SECS: &str = "DIRBROWSE_HEALTH_CHECK_INTERVAL_SECS";
/// Environment variable for the maximum connection age, in seconds.
pub const ENV_MAX_CONNECTION_AGE_SECS: &str = "DIRBROWSE_MAX_CONNECTION_AGE_SECS";
/// Environment variable toggling schema pre-fetch on new pools.
pub const ENV_PREFETCH_SCHEMA: &str = "DIRBROWSE_PREFETCH_SCHEMA";

/// Configuration for paged browsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseOptions {
    /// Entries per page
    pub page_size: u32,
    /// Filter used when the caller supplies none
    pub default_filter: String,
    /// Minimal attribute projection for listing entries
    pub attributes: Vec<String>,
}

impl Default for BrowseOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            default_filter: "(objectClass=*)".to_string(),
            attributes: vec!["objectClass".to_string()],
        }
    }
}

impl BrowseOptions {
    /// Builder method to set the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Validates browse parameters.
    ///
    /// # Errors
    /// Returns error if the page size is out of range or the filter is empty
    pub fn validate(&self) -> crate::Result<()> {
        if self.page_size == 0 || self.page_size > 10_000 {
            return Err(crate::error::DirectoryError::configuration(
                "page_size must be between 1 and 10000",
            ));
        }
        if self.default_filter.trim().is_empty() {
            return Err(crate::error::DirectoryError::configuration(
                "default_filter cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pool bounds, health policy and timeouts
    pub pool: PoolOptions,
    /// Page size, filter and projection for browsing
    pub browse: BrowseOptions,
    /// Fetch schema in the background whenever a new pool is built
    pub prefetch_schema: bool,
}

impl EngineConfig {
    /// Creates a config with defaults and schema pre-fetch enabled.
    pub fn new() -> Self {
        Self {
            prefetch_schema: true,
            ..Default::default()
        }
    }

    /// Builder method to replace pool options.
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Builder method to replace browse options.
    pub fn with_browse(mut self, browse: BrowseOptions) -> Self {
        self.browse = browse;
        self
    }

    /// Builder method to toggle schema pre-fetch.
    pub fn with_prefetch_schema(mut self, prefetch: bool) -> Self {
        self.prefetch_schema = prefetch;
        self
    }

    /// Reads overrides from `DIRBROWSE_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is set but unparseable, or the result
    /// fails validation
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if a value is unparseable or the result fails validation
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(page_size) = parse_var::<u32>(&lookup, ENV_PAGE_SIZE)? {
            config.browse.page_size = page_size;
        }
        if let Some(max_size) = parse_var::<usize>(&lookup, ENV_POOL_MAX_SIZE)? {
            config.pool.max_size = max_size;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_HEALTH_CHECK_INTERVAL_SECS)? {
            config.pool.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_MAX_CONNECTION_AGE_SECS)? {
            config.pool.max_connection_age = Duration::from_secs(secs);
        }
        if let Some(prefetch) = parse_var::<bool>(&lookup, ENV_PREFETCH_SCHEMA)? {
            config.prefetch_schema = prefetch;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first invalid setting found
    pub fn validate(&self) -> crate::Result<()> {
        self.pool.validate()?;
        self.browse.validate()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> crate::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            crate::error::DirectoryError::configuration(format!(
                "Invalid value for {}: {}",
                key, e
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::new();
        assert!(config.prefetch_schema);
        assert_eq!(config.browse.page_size, 100);
        assert_eq!(config.browse.default_filter, "(objectClass=*)");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_PAGE_SIZE, "25"),
            (ENV_POOL_MAX_SIZE, "4"),
            (ENV_HEALTH_CHECK_INTERVAL_SECS, "15"),
            (ENV_MAX_CONNECTION_AGE_SECS, "120"),
            (ENV_PREFETCH_SCHEMA, "false"),
        ]))
        .unwrap();

        assert_eq!(config.browse.page_size, 25);
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.health_check_interval, Duration::from_secs(15));
        assert_eq!(config.pool.max_connection_age, Duration::from_secs(120));
        assert!(!config.prefetch_schema);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup_from(&[(ENV_PAGE_SIZE, "lots")])).unwrap_err();
        assert!(err.to_string().contains(ENV_PAGE_SIZE));

        assert!(EngineConfig::from_lookup(lookup_from(&[(ENV_PAGE_SIZE, "0")])).is_err());
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        temp_env::with_vars(
            [(ENV_PAGE_SIZE, Some("42")), (ENV_PREFETCH_SCHEMA, Some("true"))],
            || {
                let config = EngineConfig::from_env().unwrap();
                assert_eq!(config.browse.page_size, 42);
                assert!(config.prefetch_schema);
            },
        );
    }
}
