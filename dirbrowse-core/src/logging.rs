//! Shared logging setup for applications embedding the engine.
//!
//! The engine only emits `tracing` events; installing a subscriber is up to
//! the host application. These helpers give a consistent default.

use crate::Result;
use crate::error::DirectoryError;
use tracing_subscriber::EnvFilter;

/// Maps CLI-style verbosity flags to a level.
fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured logging based on verbosity level.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show ERROR level logs
///
/// # Errors
/// Returns a configuration error if a global subscriber is already set
///
/// # Example
/// ```rust,no_run
/// use dirbrowse_core::logging::init_logging;
///
/// // Initialize at DEBUG level
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(level_for(verbose, quiet))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| DirectoryError::configuration(format!("Failed to initialize logging: {}", e)))
}

/// Initializes JSON logging filtered by `RUST_LOG`, falling back to
/// `default_directive` when it is unset.
///
/// # Errors
/// Returns a configuration error if the directive is invalid or a global
/// subscriber is already set
pub fn init_json_logging(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            DirectoryError::configuration(format!("Invalid log directive '{}': {}", default_directive, e))
        })?,
    };

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .try_init()
        .map_err(|e| DirectoryError::configuration(format!("Failed to initialize logging: {}", e)))
}
