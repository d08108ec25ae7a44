//! Exponential backoff.
//!
//! # Algorithm
//!
//! 1. First value is `base_delay`, or `max_delay` if that is smaller
//! 2. Each following value is the previous one times `multiplier`
//! 3. Every value is clamped to `max_delay` when one is given
//!
//! The n-th value is therefore `min(base_delay * multiplier^(n-1), max_delay)`.
//! Without a cap the sequence grows until it saturates at `Duration::MAX`.

use std::time::Duration;

/// Infinite exponential backoff sequence.
#[derive(Debug, Clone)]
pub struct Exponential {
    next: Duration,
    multiplier: f64,
    max_delay: Option<Duration>,
}

impl Exponential {
    /// Create a new exponential sequence.
    ///
    /// # Arguments
    /// * `base_delay` - First wait before the first retry
    /// * `multiplier` - Growth factor applied after each retry
    /// * `max_delay` - Optional cap on any single wait
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Option<Duration>) -> Self {
        let next = match max_delay {
            Some(max) => base_delay.min(max),
            None => base_delay,
        };
        Self {
            next,
            multiplier,
            max_delay,
        }
    }

    fn clamp(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for Exponential {
    /// Base one second, doubling, no cap.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, None)
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(Duration::MAX);
        self.next = self.clamp(grown);
        Some(current)
    }
}

/// Shorthand for [`Exponential::new`].
pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Option<Duration>) -> Exponential {
    Exponential::new(base_delay, multiplier, max_delay)
}
