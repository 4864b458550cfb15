//! Tracing initialization

use crate::error::{Error, Result};
use crate::types::{LogConfig, LogFormat};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `config.level`. Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::invalid_config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Plain => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    result.map_err(|e| Error::invalid_config(format!("Failed to install tracing subscriber: {}", e)))
}
