//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds > 0, multiplier >= 1)
//! - Check header names and values are representable on the wire
//!
//! # Design Decisions
//! - Returns all validation issues, not just the first
//! - Validation is a pure function: ClientConfig → Result<(), Vec<ConfigIssue>>
//! - Runs before config is accepted into the system

use reqwest::header::{HeaderName, HeaderValue};

use crate::config::schema::{ClientConfig, RateLimitAlgorithm, RetryConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Checks for a retry section, also applied to per-request overrides.
pub fn retry_issues(retry: &RetryConfig) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
        issues.push(ConfigIssue::new("retry.multiplier", "must be at least 1.0"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        issues.push(ConfigIssue::new("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
    }
    issues
}

/// Validate a configuration, collecting every issue found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ConfigIssue>> {
    let mut issues = Vec::new();

    if config.timeouts.request_ms == 0 {
        issues.push(ConfigIssue::new("timeouts.request_ms", "must be greater than zero"));
    }
    if config.timeouts.connect_ms == 0 {
        issues.push(ConfigIssue::new("timeouts.connect_ms", "must be greater than zero"));
    }

    if config.pool.max_connections == 0 {
        issues.push(ConfigIssue::new("pool.max_connections", "must be greater than zero"));
    }
    if config.pool.max_per_host == 0 {
        issues.push(ConfigIssue::new("pool.max_per_host", "must be greater than zero"));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.capacity == 0 {
            issues.push(ConfigIssue::new("rate_limit.capacity", "must be greater than zero"));
        }
        match rl.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                if !(rl.refill_per_sec.is_finite() && rl.refill_per_sec > 0.0) {
                    issues.push(ConfigIssue::new(
                        "rate_limit.refill_per_sec",
                        "must be a positive number",
                    ));
                }
            }
            RateLimitAlgorithm::SlidingWindow | RateLimitAlgorithm::FixedWindow => {
                if rl.window_ms == 0 {
                    issues.push(ConfigIssue::new("rate_limit.window_ms", "must be greater than zero"));
                }
            }
        }
    }

    let cb = &config.circuit_breaker;
    if cb.enabled {
        if cb.failure_threshold == 0 {
            issues.push(ConfigIssue::new("circuit_breaker.failure_threshold", "must be greater than zero"));
        }
        if cb.success_threshold == 0 {
            issues.push(ConfigIssue::new("circuit_breaker.success_threshold", "must be greater than zero"));
        }
        if cb.half_open_max_calls == 0 {
            issues.push(ConfigIssue::new("circuit_breaker.half_open_max_calls", "must be greater than zero"));
        }
        if cb.window_secs == 0 {
            issues.push(ConfigIssue::new("circuit_breaker.window_secs", "must be greater than zero"));
        }
    }

    if config.max_response_bytes == 0 {
        issues.push(ConfigIssue::new("max_response_bytes", "must be greater than zero"));
    }

    if config.cache.enabled && config.cache.max_size == 0 {
        issues.push(ConfigIssue::new("cache.max_size", "must be greater than zero"));
    }
    for name in &config.cache.vary_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            issues.push(ConfigIssue::new("cache.vary_headers", format!("'{name}' is not a valid header name")));
        }
    }

    issues.extend(retry_issues(&config.retry));

    if config.ssrf.allowed_schemes.is_empty() {
        issues.push(ConfigIssue::new("ssrf.allowed_schemes", "must list at least one scheme"));
    }
    for scheme in &config.ssrf.allowed_schemes {
        if scheme != "http" && scheme != "https" {
            issues.push(ConfigIssue::new(
                "ssrf.allowed_schemes",
                format!("'{scheme}' is not supported (only http and https)"),
            ));
        }
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        issues.push(ConfigIssue::new(
            "observability.log_level",
            format!("'{}' is not one of {}", config.observability.log_level, LOG_LEVELS.join(", ")),
        ));
    }

    if config.load_test.max_concurrency == 0 {
        issues.push(ConfigIssue::new("load_test.max_concurrency", "must be greater than zero"));
    }
    if config.load_test.max_duration_secs == 0 {
        issues.push(ConfigIssue::new("load_test.max_duration_secs", "must be greater than zero"));
    }

    for (name, value) in &config.default_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            issues.push(ConfigIssue::new("default_headers", format!("'{name}' is not a valid header name")));
        }
        if HeaderValue::from_str(value).is_err() {
            issues.push(ConfigIssue::new("default_headers", format!("value of '{name}' is not a valid header value")));
        }
    }
    for agent in &config.user_agents {
        if HeaderValue::from_str(agent).is_err() {
            issues.push(ConfigIssue::new("user_agents", format!("'{agent}' is not a valid header value")));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
