//! Process-wide tracing setup.
//!
//! Records emitted through the `log` facade (the database layer) are bridged
//! into `tracing`, so a single subscriber sees everything.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{MediaCheckError, Result};

/// Parses `EnvFilter` directives such as `mediacheck=debug,warn`.
pub fn build_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| MediaCheckError::Telemetry(format!("invalid filter '{}': {}", directives, e)))
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured filter.
///
/// Fails if a global subscriber or `log` logger is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.filter)?,
    };

    tracing_log::LogTracer::init()
        .map_err(|e| MediaCheckError::Telemetry(format!("log bridge: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
    };

    installed.map_err(|e| MediaCheckError::Telemetry(e.to_string()))
}
