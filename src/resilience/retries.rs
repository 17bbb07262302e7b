//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether an attempt outcome is retryable
//! - Bound the number of attempts to `max_retries + 1`
//! - Compute the delay before each retry (exponential, optionally jittered)
//!
//! # Design Decisions
//! - Only timeouts, connection errors and configured statuses are retried
//! - Rate-limit and circuit-open rejections are never retried in-call
//! - The policy is a plain value; the pipeline drives the loop

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Error;
use crate::resilience::backoff;
use crate::transport::{Response, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
    retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    pub fn is_retryable_error(&self, error: &Error) -> bool {
        matches!(
            error,
            Error::Timeout(_)
                | Error::Transport(TransportError::Timeout)
                | Error::Transport(TransportError::Connection(_))
        )
    }

    pub fn is_retryable(&self, outcome: &Result<Response, Error>) -> bool {
        match outcome {
            Ok(response) => self.is_retryable_status(response.status.as_u16()),
            Err(error) => self.is_retryable_error(error),
        }
    }

    /// Whether attempt number `attempt` (1-based) should be followed by another.
    pub fn should_retry(&self, attempt: u32, outcome: &Result<Response, Error>) -> bool {
        attempt < self.max_attempts() && self.is_retryable(outcome)
    }

    /// Upper bound of the delay before the `retry`-th retry.
    pub fn ceiling(&self, retry: u32) -> Duration {
        backoff::ceiling(retry, self.base, self.multiplier, self.max_delay)
    }

    /// Delay before the `retry`-th retry, i.e. after attempt number `retry` failed.
    ///
    /// Never shorter than the ceiling; jitter adds up to one more ceiling.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        if self.jitter {
            ceiling + backoff::jitter(ceiling)
        } else {
            ceiling
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    fn response(status: u16) -> Result<Response, Error> {
        Ok(Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            elapsed: Duration::ZERO,
        })
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_retries: 2,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
            retryable_statuses: vec![429, 503],
        })
    }

    #[test]
    fn retries_configured_statuses_until_exhausted() {
        let p = policy();
        assert!(p.should_retry(1, &response(503)));
        assert!(p.should_retry(2, &response(429)));
        assert!(!p.should_retry(3, &response(503)));
        assert!(!p.should_retry(1, &response(404)));
        assert!(!p.should_retry(1, &response(200)));
    }

    #[test]
    fn error_classification() {
        let p = policy();
        assert!(p.should_retry(1, &Err(Error::Timeout(Duration::from_secs(1)))));
        assert!(p.should_retry(1, &Err(Error::Transport(TransportError::Connection("reset".into())))));
        assert!(!p.should_retry(1, &Err(Error::Transport(TransportError::Other("bad".into())))));
        assert!(!p.should_retry(
            1,
            &Err(Error::RateLimited { key: "k".into(), retry_after: Duration::ZERO })
        ));
        assert!(!p.should_retry(
            1,
            &Err(Error::CircuitOpen { destination: "d".into(), retry_after: Duration::ZERO })
        ));
    }

    #[test]
    fn delays_without_jitter_follow_ceiling() {
        let p = policy();
        assert_eq!(p.delay_before(1), Duration::from_secs(1));
        assert_eq!(p.delay_before(2), Duration::from_secs(2));
        assert_eq!(p.delay_before(3), Duration::from_secs(4));
    }

    #[test]
    fn jittered_delay_adds_to_ceiling() {
        let p = RetryPolicy::from_config(&RetryConfig {
            jitter: true,
            ..RetryConfig::default()
        });
        for retry in 1..5 {
            let ceiling = p.ceiling(retry);
            for _ in 0..20 {
                let delay = p.delay_before(retry);
                assert!(delay >= ceiling && delay < ceiling * 2, "{delay:?} vs {ceiling:?}");
            }
        }
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let p = RetryPolicy::from_config(&RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        });
        assert_eq!(p.max_attempts(), 1);
        assert!(!p.should_retry(1, &response(503)));
    }
}
