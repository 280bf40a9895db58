//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Filter built from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}
