//! Outbound rate limiting.
//!
//! Three interchangeable admission algorithms, selected by configuration:
//! - Token bucket: bursts up to capacity, lazy refill at a fixed rate
//! - Sliding window: exact count over the trailing window
//! - Fixed window: counter reset at epoch-aligned boundaries (bursts of up
//!   to twice the limit across a boundary are accepted)
//!
//! The per-key state types are plain structs whose transition functions take
//! the current time, so they can be driven deterministically in tests.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{RateLimitAlgorithm, RateLimitConfig, RateLimitScope};
use crate::security::ssrf::Destination;

const GLOBAL_KEY: &str = "global";

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// A token bucket with lazy refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }

    pub fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> Admission {
        self.refill(capacity, refill_rate, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Admission::Admitted
        } else {
            let deficit = 1.0 - self.tokens;
            Admission::Rejected {
                retry_after: Duration::from_secs_f64(deficit / refill_rate),
            }
        }
    }

    pub fn available(&self, capacity: f64, refill_rate: f64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * refill_rate).min(capacity)
    }
}

/// Log of admission instants within the trailing window.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    admissions: VecDeque<Instant>,
}

impl SlidingWindow {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&oldest) = self.admissions.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn try_acquire(&mut self, limit: u32, window: Duration, now: Instant) -> Admission {
        self.prune(window, now);

        if self.admissions.len() < limit as usize {
            self.admissions.push_back(now);
            return Admission::Admitted;
        }

        let retry_after = self
            .admissions
            .front()
            .map(|&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or(window);
        Admission::Rejected { retry_after }
    }

    pub fn in_window(&self, window: Duration, now: Instant) -> usize {
        self.admissions
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < window)
            .count()
    }
}

/// Counter for the current epoch-aligned window.
#[derive(Debug, Clone, Default)]
pub struct FixedWindow {
    index: u64,
    count: u32,
}

impl FixedWindow {
    /// `since_epoch` is wall-clock time since the unix epoch.
    pub fn try_acquire(&mut self, limit: u32, window: Duration, since_epoch: Duration) -> Admission {
        let window_ms = window.as_millis().max(1);
        let now_ms = since_epoch.as_millis();
        let index = (now_ms / window_ms) as u64;

        if index != self.index {
            self.index = index;
            self.count = 0;
        }

        if self.count < limit {
            self.count += 1;
            Admission::Admitted
        } else {
            let next_boundary = (index as u128 + 1) * window_ms;
            Admission::Rejected {
                retry_after: Duration::from_millis((next_boundary - now_ms) as u64),
            }
        }
    }

    pub fn in_window(&self, window: Duration, since_epoch: Duration) -> u32 {
        let index = (since_epoch.as_millis() / window.as_millis().max(1)) as u64;
        if index == self.index {
            self.count
        } else {
            0
        }
    }
}

#[derive(Debug, Clone)]
enum LimiterState {
    Bucket(TokenBucket),
    Sliding(SlidingWindow),
    Fixed(FixedWindow),
}

/// Snapshot of one key's limiter state.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub key: String,
    pub algorithm: RateLimitAlgorithm,
    pub capacity: u32,
    /// Tokens left (token bucket) or admissions left in the current window.
    pub remaining: f64,
}

/// Keyed rate limiter registry.
pub struct RateLimiter {
    config: RateLimitConfig,
    states: DashMap<String, LimiterState>,
    // Anchors fixed windows to wall-clock time while measuring with the
    // monotonic clock.
    origin: Instant,
    origin_epoch: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let origin_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            config,
            states: DashMap::new(),
            origin: Instant::now(),
            origin_epoch,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// State key for a destination under the configured scope.
    pub fn key_for(&self, destination: &Destination) -> String {
        match self.config.scope {
            RateLimitScope::Destination => destination.to_string(),
            RateLimitScope::Global => GLOBAL_KEY.to_string(),
        }
    }

    fn since_epoch(&self, now: Instant) -> Duration {
        self.origin_epoch + now.saturating_duration_since(self.origin)
    }

    fn fresh_state(&self, now: Instant) -> LimiterState {
        match self.config.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                LimiterState::Bucket(TokenBucket::new(self.config.capacity as f64, now))
            }
            RateLimitAlgorithm::SlidingWindow => LimiterState::Sliding(SlidingWindow::default()),
            RateLimitAlgorithm::FixedWindow => LimiterState::Fixed(FixedWindow::default()),
        }
    }

    /// Try to admit one request for `key`.
    pub fn try_acquire(&self, key: &str) -> Admission {
        if !self.config.enabled {
            return Admission::Admitted;
        }

        let now = Instant::now();
        let capacity = self.config.capacity;
        let window = self.config.window();

        let admission = {
            let mut entry = self
                .states
                .entry(key.to_string())
                .or_insert_with(|| self.fresh_state(now));
            match entry.value_mut() {
                LimiterState::Bucket(bucket) => {
                    bucket.try_acquire(capacity as f64, self.config.refill_per_sec, now)
                }
                LimiterState::Sliding(log) => log.try_acquire(capacity, window, now),
                LimiterState::Fixed(counter) => {
                    counter.try_acquire(capacity, window, self.since_epoch(now))
                }
            }
        };

        if let Admission::Rejected { retry_after } = admission {
            tracing::debug!(key = %key, ?retry_after, "Rate limit exceeded");
        }
        admission
    }

    pub fn stats(&self, key: &str) -> Option<RateLimitStats> {
        let now = Instant::now();
        let capacity = self.config.capacity;
        let state = self.states.get(key)?;
        let remaining = match state.value() {
            LimiterState::Bucket(bucket) => {
                bucket.available(capacity as f64, self.config.refill_per_sec, now)
            }
            LimiterState::Sliding(log) => {
                capacity.saturating_sub(log.in_window(self.config.window(), now) as u32) as f64
            }
            LimiterState::Fixed(counter) => capacity
                .saturating_sub(counter.in_window(self.config.window(), self.since_epoch(now)))
                as f64,
        };
        Some(RateLimitStats {
            key: key.to_string(),
            algorithm: self.config.algorithm,
            capacity,
            remaining,
        })
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        self.states.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(algorithm: RateLimitAlgorithm, capacity: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            algorithm,
            scope: RateLimitScope::Destination,
            capacity,
            refill_per_sec: 1.0,
            window_ms: 1_000,
        }
    }

    #[test]
    fn bucket_allows_burst_then_refills() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3.0, start);
        for _ in 0..3 {
            assert!(bucket.try_acquire(3.0, 2.0, start).is_admitted());
        }
        match bucket.try_acquire(3.0, 2.0, start) {
            Admission::Rejected { retry_after } => assert_eq!(retry_after, Duration::from_millis(500)),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(bucket.try_acquire(3.0, 2.0, start + Duration::from_millis(500)).is_admitted());
    }

    #[test]
    fn sliding_window_never_exceeds_limit() {
        let start = Instant::now();
        let window = Duration::from_millis(1_000);
        let mut log = SlidingWindow::default();
        let mut admitted = Vec::new();

        // Arrivals every 70ms for 5 seconds.
        for step in 0..72u64 {
            let now = start + Duration::from_millis(step * 70);
            if log.try_acquire(4, window, now).is_admitted() {
                admitted.push(now);
            }
        }

        for (i, &at) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|&&later| later.duration_since(at) < window)
                .count();
            assert!(in_window <= 4);
        }
        assert!(admitted.len() >= 16);
    }

    #[test]
    fn sliding_window_retry_after_tracks_oldest() {
        let start = Instant::now();
        let window = Duration::from_secs(1);
        let mut log = SlidingWindow::default();
        assert!(log.try_acquire(1, window, start).is_admitted());
        let later = start + Duration::from_millis(300);
        assert_eq!(
            log.try_acquire(1, window, later),
            Admission::Rejected { retry_after: Duration::from_millis(700) }
        );
    }

    #[test]
    fn fixed_window_resets_on_boundary() {
        let window = Duration::from_secs(1);
        let mut counter = FixedWindow::default();
        let t = Duration::from_millis(10_400);
        assert!(counter.try_acquire(2, window, t).is_admitted());
        assert!(counter.try_acquire(2, window, t).is_admitted());
        assert_eq!(
            counter.try_acquire(2, window, t),
            Admission::Rejected { retry_after: Duration::from_millis(600) }
        );
        assert!(counter.try_acquire(2, window, Duration::from_millis(11_000)).is_admitted());
    }

    #[tokio::test(start_paused = true)]
    async fn registry_keys_are_independent() {
        let limiter = RateLimiter::new(config(RateLimitAlgorithm::TokenBucket, 2));
        assert!(limiter.try_acquire("a").is_admitted());
        assert!(limiter.try_acquire("a").is_admitted());
        assert!(!limiter.try_acquire("a").is_admitted());
        assert!(limiter.try_acquire("b").is_admitted());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire("a").is_admitted());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_and_reset() {
        let limiter = RateLimiter::new(config(RateLimitAlgorithm::SlidingWindow, 5));
        for _ in 0..3 {
            limiter.try_acquire("k");
        }
        let stats = limiter.stats("k").unwrap();
        assert_eq!(stats.remaining, 2.0);

        limiter.reset("k");
        assert!(limiter.stats("k").is_none());
    }

    #[test]
    fn global_scope_shares_one_key() {
        let limiter = RateLimiter::new(RateLimitConfig {
            scope: RateLimitScope::Global,
            ..config(RateLimitAlgorithm::TokenBucket, 1)
        });
        let a = Destination { scheme: "http".into(), host: "a.example".into(), port: 80 };
        let b = Destination { scheme: "http".into(), host: "b.example".into(), port: 80 };
        assert_eq!(limiter.key_for(&a), limiter.key_for(&b));
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..config(RateLimitAlgorithm::TokenBucket, 1)
        });
        for _ in 0..10 {
            assert!(limiter.try_acquire("k").is_admitted());
        }
    }
}
