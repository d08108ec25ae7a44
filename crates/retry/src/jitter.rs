//! Jitter functions.
//!
//! A jitter function maps the raw backoff duration to the duration actually
//! waited, spreading concurrent retries over time so they do not collide.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// A jitter function, shareable across invokers.
pub type Jitter = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// "Full jitter": a uniformly random duration in `[0, max_value]`.
pub fn full_jitter(max_value: Duration) -> Duration {
    let upper = max_value.as_secs_f64();
    if upper <= 0.0 || !upper.is_finite() {
        return max_value;
    }
    Duration::from_secs_f64(rand::rng().random_range(0.0..=upper))
}
