//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick JSON or human-readable output
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - JSON format for machine parsing, pretty format for terminals

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter directives for the configured level.
pub fn default_directives(config: &ObservabilityConfig) -> String {
    format!("slayer={},warn", config.log_level.to_ascii_lowercase())
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let (json, pretty) = match config.log_format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_follow_configured_level() {
        let config = ObservabilityConfig {
            log_level: "DEBUG".to_string(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(default_directives(&config), "slayer=debug,warn");
    }
}
