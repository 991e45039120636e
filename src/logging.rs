//! Subscriber setup for binaries embedding the service.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Result, ServiceError};

/// Install a global `fmt` subscriber. `RUST_LOG` wins over `config.level`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ServiceError::Configuration(format!("invalid log level '{}': {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        "pretty" => builder.pretty().try_init(),
        other => {
            return Err(ServiceError::Configuration(format!(
                "unknown log format '{other}' (expected pretty, json or compact)"
            )));
        }
    };

    installed.map_err(|e| ServiceError::Configuration(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        let config = LoggingConfig {
            level: "info".to_string(),
            format: "xml".to_string(),
        };

        let err = init(&config).unwrap_err();
        assert!(err.to_string().contains("xml"));
    }
}
