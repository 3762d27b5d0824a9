//! # Meshbus Telemetry
//!
//! Log initialisation and Prometheus metrics shared by every Meshbus crate.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mb_telemetry::{init_logging, register_metrics, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! let _metrics = register_metrics()?;
//! ```
//!
//! Embedders that only want logs call [`init_log_from_env_or`] with a
//! fallback filter such as `"warn"`.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MB_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directive |
//! | `MB_JSON_LOGS` | `false` | Emit JSON lines instead of text |
//! | `MB_SERVICE_NAME` | `meshbus` | Service name attached to startup logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_log_from_env_or, init_logging};
pub use metrics::{
    gather_text, register_metrics, MetricsHandle, LINKS_ACTIVE, QUERIES_ISSUED, QUERIES_RESOLVED,
    ROUTING_ERRORS, SAMPLES_DELIVERED, SAMPLES_DROPPED, SAMPLES_PUBLISHED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
