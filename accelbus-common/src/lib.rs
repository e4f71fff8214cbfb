//! accelbus common library
//!
//! Shared types and utilities for the accelbus sensor-node poller:
//!
//! - [`telemetry`] - Published telemetry model (`TelemetryPoint`, `TelemetryValue`)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression builders and parsers
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, ZenohConfig, ZenohMode, load_config, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use telemetry::{TelemetryPoint, TelemetryValue, current_timestamp_millis};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. A level that is not a valid
/// `EnvFilter` directive is a configuration error rather than a silent fallback.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::config(format!("Invalid log level '{}': {}", config.level, e))
        })?,
    };

    let layer = match config.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::config(format!("Failed to initialize tracing: {}", e)))
}
