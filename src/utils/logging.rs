//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber according to [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level when set.

use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber described by `config`.
///
/// Calling this when a subscriber is already installed is not an error; the
/// existing subscriber is kept.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ProtocolError::ConfigError(errors.join("; ")));
    }

    if !config.log_to_console {
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_format {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    match installed {
        Ok(()) => info!(app = %config.app_name, level = %config.log_level, "Logging initialized"),
        Err(e) => debug!(error = %e, "Global subscriber already installed"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = LoggingConfig {
            app_name: String::new(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
