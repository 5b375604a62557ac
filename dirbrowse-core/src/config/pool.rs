//! Connection pool sizing and health-check configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which moments a pooled connection is validated at.
///
/// Each check issues a cheap root-metadata read and requires it to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    /// Validate a freshly created connection before first use
    pub on_create: bool,
    /// Validate a connection after an operation on it failed
    pub after_exception: bool,
    /// Validate an idle connection when it is checked out
    pub on_checkout: bool,
    /// Validate a connection when it is released back to the pool
    pub on_release: bool,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            on_create: true,
            after_exception: true,
            on_checkout: true,
            on_release: true,
        }
    }
}

/// Configuration for per-server connection pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Connections kept open even when idle
    pub min_size: usize,
    /// Upper bound on open connections
    pub max_size: usize,
    /// Time to wait for a free connection before giving up
    pub acquire_timeout: Duration,
    /// Interval of the background health sweep
    pub health_check_interval: Duration,
    /// Connections older than this are retired
    pub max_connection_age: Duration,
    /// Time allowed for a single health-check read
    pub health_check_timeout: Duration,
    /// Which validations run and when
    pub health_checks: HealthCheckPolicy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            max_connection_age: Duration::from_secs(300),
            health_check_timeout: Duration::from_secs(5),
            health_checks: HealthCheckPolicy::default(),
        }
    }
}

impl PoolOptions {
    /// Builder method to set pool bounds.
    pub fn with_bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Builder method to set the background sweep interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Builder method to set the maximum connection age.
    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = age;
        self
    }

    /// Builder method to set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Builder method to replace the health-check policy.
    pub fn with_health_checks(mut self, policy: HealthCheckPolicy) -> Self {
        self.health_checks = policy;
        self
    }

    /// Validates pool parameters.
    ///
    /// # Errors
    /// Returns error if bounds or durations are invalid
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_size == 0 {
            return Err(crate::error::DirectoryError::configuration(
                "max_size must be greater than 0",
            ));
        }

        if self.max_size > 100 {
            return Err(crate::error::DirectoryError::configuration(
                "max_size should not exceed 100 connections per server",
            ));
        }

        if self.min_size > self.max_size {
            return Err(crate::error::DirectoryError::configuration(
                "min_size cannot exceed max_size",
            ));
        }

        if self.acquire_timeout.is_zero()
            || self.health_check_interval.is_zero()
            || self.max_connection_age.is_zero()
            || self.health_check_timeout.is_zero()
        {
            return Err(crate::error::DirectoryError::configuration(
                "pool timeouts and intervals must be greater than 0",
            ));
        }

        Ok(())
    }
}
