//! Logging bootstrap
//!
//! Structured logs are the only observability surface besides the health
//! endpoint. The subscriber is installed once per process; later calls are
//! no-ops so tests and the binary can both call [`init_tracing`].

use perkgate_domain::{ConfigError, LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::invalid("logging.level", e.to_string())),
    }
}

/// Install the global subscriber
///
/// Returns `Ok(true)` if this call installed it, `Ok(false)` if one was
/// already in place.
///
/// # Errors
/// Returns [`ConfigError::Invalid`] if the level is not a valid filter
/// directive.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init().is_ok(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(level = %config.level, format = ?config.format, "Tracing initialised");
    }
    Ok(installed)
}
