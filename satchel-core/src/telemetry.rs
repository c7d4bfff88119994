//! Tracing subscriber bootstrap.
//!
//! Libraries in this workspace only emit `tracing` events. The embedding
//! process (background host, test harness) calls [`init_tracing`] once.

use crate::{ConfigError, LogConfig, SatchelResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the `EnvFilter`, preferring `RUST_LOG` over the configured directive.
pub fn env_filter(config: &LogConfig) -> SatchelResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| {
        ConfigError::InvalidValue {
            field: "log.filter".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> SatchelResult<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| ConfigError::InvalidValue {
        field: "log".to_string(),
        value: config.filter.clone(),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}
