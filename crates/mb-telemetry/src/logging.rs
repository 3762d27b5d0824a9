//! Log subscriber installation.
//!
//! Only one global subscriber can exist per process. Both entry points
//! report whether they installed it; later calls are no-ops.

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::EnvFilter;

/// Install a text subscriber filtered by `RUST_LOG`, or by `fallback_filter`
/// when `RUST_LOG` is unset or unparsable.
///
/// Returns `true` if this call installed the subscriber.
pub fn init_log_from_env_or(fallback_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install the subscriber described by `config`.
///
/// Returns `Ok(false)` if a subscriber was already installed.
///
/// # Errors
///
/// Returns [`TelemetryError::Config`] if `log_level` is not a valid filter
/// directive.
pub fn init_logging(config: &TelemetryConfig) -> Result<bool, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("log level '{}': {e}", config.log_level)))?;

    let installed = if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(
            service = %config.service_name,
            json_logs = config.json_logs,
            "Logging initialized"
        );
    }
    Ok(installed)
}
