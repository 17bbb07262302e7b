//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so a minimal (or empty) file is valid.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the request pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-attempt deadlines.
    pub timeouts: TimeoutConfig,

    /// Connection pool bounds.
    pub pool: PoolConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Outbound target validation.
    pub ssrf: SsrfConfig,

    /// Logging, metrics and audit settings.
    pub observability: ObservabilityConfig,

    /// Safety limits applied to load campaigns.
    pub load_test: LoadTestConfig,

    /// Headers added to every request that does not set them itself.
    pub default_headers: BTreeMap<String, String>,

    /// User-Agent values rotated across requests without one.
    pub user_agents: Vec<String>,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,

    /// Largest response body read from a target, in bytes.
    pub max_response_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            pool: PoolConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            ssrf: SsrfConfig::default(),
            observability: ObservabilityConfig::default(),
            load_test: LoadTestConfig::default(),
            default_headers: BTreeMap::new(),
            user_agents: vec![
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15".to_string(),
            ],
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            max_response_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP/TLS connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Deadline for one attempt (pool wait + send + body) in milliseconds.
    pub request_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent in-flight requests across all destinations.
    pub max_connections: usize,

    /// Maximum concurrent in-flight requests to one destination.
    pub max_per_host: usize,

    /// Idle keep-alive timeout for transport connections in seconds.
    pub idle_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_per_host: 20,
            idle_secs: 90,
        }
    }
}

/// Admission algorithm used by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

/// What the rate limiter keys its state on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Destination,
    Global,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub algorithm: RateLimitAlgorithm,

    pub scope: RateLimitScope,

    /// Bucket size (token bucket) or admissions per window (window algorithms).
    pub capacity: u32,

    /// Tokens added per second (token bucket only).
    pub refill_per_sec: f64,

    /// Window length in milliseconds (window algorithms only).
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            scope: RateLimitScope::Destination,
            capacity: 50,
            refill_per_sec: 25.0,
            window_ms: 1_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Failures within `window_secs` that open the circuit.
    pub failure_threshold: u32,

    /// Probe successes in half-open that close the circuit.
    pub success_threshold: u32,

    /// Rolling window for counting failures, in seconds.
    pub window_secs: u64,

    /// Time spent open before probing, in milliseconds.
    pub open_timeout_ms: u64,

    /// Concurrent probes allowed while half-open.
    pub half_open_max_calls: u32,

    /// Response statuses counted as failures.
    pub failure_status_codes: Vec<u16>,
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            window_secs: 60,
            open_timeout_ms: 60_000,
            half_open_max_calls: 1,
            failure_status_codes: vec![500, 502, 503, 504],
        }
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    pub backend: CacheBackend,

    /// Maximum number of entries held by the memory backend.
    pub max_size: usize,

    /// TTL for entries stored without an explicit one, in seconds.
    pub default_ttl_secs: u64,

    /// Request headers that participate in the cache key.
    pub vary_headers: Vec<String>,

    /// Methods whose responses may be cached.
    pub cacheable_methods: Vec<String>,

    /// When true, cache hits still consume a rate-limit admission.
    pub count_hits_against_rate_limit: bool,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            max_size: 1_000,
            default_ttl_secs: 300,
            vary_headers: ["accept", "accept-encoding", "accept-language", "authorization", "content-type"]
                .into_iter()
                .map(String::from)
                .collect(),
            cacheable_methods: vec!["GET".to_string(), "HEAD".to_string()],
            count_hits_against_rate_limit: false,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying).
    pub max_retries: u32,

    /// Delay ceiling before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Add a uniform random amount below the ceiling to each delay.
    pub jitter: bool,

    /// Response statuses that are retried.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Outbound target (SSRF) protection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsrfConfig {
    /// Enable address and hostname checks. Scheme checks always apply.
    pub enabled: bool,

    pub allowed_schemes: Vec<String>,

    /// Reject private, link-local and unique-local addresses.
    pub block_private: bool,

    /// Reject loopback and unspecified addresses and localhost names.
    pub block_localhost: bool,

    /// Additional hostnames to reject. A leading `.` matches subdomains only.
    pub blocked_hosts: Vec<String>,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            block_private: true,
            block_localhost: true,
            blocked_hosts: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Emit attempt metrics through the `metrics` facade.
    pub metrics_enabled: bool,

    /// Emit audit events through tracing.
    pub audit_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            audit_enabled: true,
        }
    }
}

/// Load test safety limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Upper bound on concurrent workers.
    pub max_concurrency: usize,

    /// Upper bound on campaign duration in seconds.
    pub max_duration_secs: u64,
}

impl LoadTestConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            max_duration_secs: 3_600,
        }
    }
}
