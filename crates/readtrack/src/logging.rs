//! Logging setup.

use tracing_subscriber::EnvFilter;

use crate::ReadtrackError;
use crate::config::LoggingConfig;

/// Installs a `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `config.level`.
///
/// # Errors
/// [`ReadtrackError::Config`] if the level is not a valid filter or a
/// global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), ReadtrackError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ReadtrackError::Config(format!("invalid logging.level: {e}")))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| ReadtrackError::Config(format!("logging already initialised: {e}")))?;

    tracing::info!(level = %config.level, "logging initialized");
    Ok(())
}

/// Logging for tests. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
