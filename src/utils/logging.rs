/// Tracing subscriber setup
use tracing_subscriber::EnvFilter;

use crate::error::{FeedError, Result};
use crate::types::{LogFormat, LoggingConfig};

/// Install the global subscriber. `RUST_LOG` takes precedence over the configured level.
/// Logs go to stderr; stdout is reserved for event and query output.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FeedError::ConfigError(format!("Invalid log level '{}': {}", config.level, e)))?;

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| FeedError::InternalError(format!("Logging already initialized: {}", e)))
}
