//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ConfigIssue};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },

    #[error("validation failed: {}", join_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply `SLAYER_*` environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: ClientConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Invalid)?;

    Ok(config)
}

/// Defaults plus `SLAYER_*` environment overrides, validated.
pub fn from_env() -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Invalid)?;
    Ok(config)
}

/// Apply overrides read through `lookup`.
///
/// Recognised variables:
/// - `SLAYER_LOG_LEVEL`: log level
/// - `SLAYER_REQUEST_TIMEOUT`: attempt timeout in (fractional) seconds
/// - `SLAYER_CACHE_TTL`: default cache TTL in seconds
/// - `SLAYER_SSRF_PROTECTION`: `true`/`false`/`1`/`0`
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("SLAYER_LOG_LEVEL") {
        config.observability.log_level = level.to_ascii_lowercase();
    }

    if let Some(raw) = lookup("SLAYER_REQUEST_TIMEOUT") {
        let secs: f64 = raw
            .trim()
            .parse()
            .ok()
            .filter(|s: &f64| s.is_finite() && *s > 0.0)
            .ok_or(ConfigError::Env {
                var: "SLAYER_REQUEST_TIMEOUT",
                value: raw.clone(),
            })?;
        config.timeouts.request_ms = (secs * 1000.0).round() as u64;
    }

    if let Some(raw) = lookup("SLAYER_CACHE_TTL") {
        config.cache.default_ttl_secs = raw.trim().parse().map_err(|_| ConfigError::Env {
            var: "SLAYER_CACHE_TTL",
            value: raw.clone(),
        })?;
    }

    if let Some(raw) = lookup("SLAYER_SSRF_PROTECTION") {
        config.ssrf.enabled = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::Env {
                    var: "SLAYER_SSRF_PROTECTION",
                    value: raw,
                })
            }
        };
    }

    Ok(())
}
