//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay ceiling before the `retry`-th retry (1-based):
/// `base * multiplier^(retry - 1)`, capped at `max`.
pub fn ceiling(retry: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    // A multiplier below 1 (or NaN) would shrink or negate the delay.
    let multiplier = if multiplier >= 1.0 { multiplier } else { 1.0 };
    let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * multiplier.powi(exponent);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Uniformly random extra delay in `[0, span)`, added on top of a ceiling.
pub fn jitter(span: Duration) -> Duration {
    if span.is_zero() {
        return span;
    }
    let nanos = span.as_nanos().min(u64::MAX as u128) as u64;
    Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
}
