// Logging Initialization
// tracing-subscriber setup for applications embedding the crate

use crate::config::ConfigError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to `dbconnect=<default_level>`
pub fn env_filter(default_level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("dbconnect={}", default_level)))
        .map_err(|e| ConfigError::Invalid(format!("Failed to create log filter: {}", e)))
}

/// Install a compact stdout subscriber. Fails if a global subscriber is already set.
pub fn init_logging(default_level: &str) -> Result<(), ConfigError> {
    let filter = env_filter(default_level)?;
    let fmt_layer = fmt::layer().with_target(true).compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("Failed to initialize logging: {}", e)))
}
