//! Error types shared by every stage of the request pipeline.

use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::pool::PoolError;
use crate::transport::TransportError;

/// A request target or request shape was rejected before any network I/O.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("scheme '{0}' is not allowed")]
    SchemeNotAllowed(String),

    #[error("url has no host")]
    MissingHost,

    /// Hostname matched the blocklist or a metadata hostname.
    #[error("host '{0}' is blocked")]
    BlockedHost(String),

    /// A resolved (or literal) address falls in a blocked range.
    #[error("address {addr} of '{host}' is in a blocked range ({range})")]
    BlockedAddress {
        host: String,
        addr: IpAddr,
        range: &'static str,
    },

    #[error("could not resolve '{host}': {reason}")]
    Unresolvable { host: String, reason: String },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("invalid retry settings: {0}")]
    InvalidRetry(String),
}

/// Top-level error returned by [`crate::RequestPipeline::execute`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("rate limited on '{key}', retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("circuit open for {destination}, retry after {retry_after:?}")]
    CircuitOpen {
        destination: String,
        retry_after: Duration,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("gave up after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Flat failure category used for metrics labels and load-test aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RateLimited,
    CircuitOpen,
    Connection,
    Timeout,
    Transport,
    ExhaustedRetries,
    Pool,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::ExhaustedRetries => "exhausted_retries",
            ErrorKind::Pool => "pool",
            ErrorKind::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::Transport(TransportError::Connection(_)) => ErrorKind::Connection,
            Error::Transport(TransportError::Timeout) | Error::Timeout(_) => ErrorKind::Timeout,
            Error::Transport(TransportError::Other(_) | TransportError::ResponseTooLarge { .. }) => {
                ErrorKind::Transport
            }
            Error::ExhaustedRetries { .. } => ErrorKind::ExhaustedRetries,
            Error::Pool(_) => ErrorKind::Pool,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Kind of the innermost cause, looking through `ExhaustedRetries`.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            Error::ExhaustedRetries { source, .. } => source.root_kind(),
            other => other.kind(),
        }
    }

    /// Backoff hint carried by rate-limit and circuit rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } | Error::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
