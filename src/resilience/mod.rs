//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against a destination:
//!     → circuit_breaker.rs (fail fast if open, hand out a permit)
//!     → timeouts.rs (deadline over pool wait + send)
//!     → permit.record(verdict) (track failures, open circuit past threshold)
//!     → retries.rs (retryable? wait backoff.rs delay, go again)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Only transient failures are retried; rejections never are
//! - Circuit breaker prevents cascading failures
//! - State machines are pure; registries add locking around them

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitPermit, CircuitPhase, CircuitSnapshot,
    CircuitState, Transition, TransitionListener, Verdict,
};
pub use retries::RetryPolicy;
