//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or defaults
//!     → loader.rs (parse & deserialize, apply SLAYER_* env overrides)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → consumed by RequestPipeline::builder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a pipeline is built from one snapshot
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{from_env, load_config, ConfigError};
pub use schema::{
    CacheBackend, CacheConfig, CircuitBreakerConfig, ClientConfig, LoadTestConfig, LogFormat,
    ObservabilityConfig, PoolConfig, RateLimitAlgorithm, RateLimitConfig, RateLimitScope,
    RetryConfig, SsrfConfig, TimeoutConfig,
};
pub use validation::{retry_issues, validate_config, ConfigIssue};
