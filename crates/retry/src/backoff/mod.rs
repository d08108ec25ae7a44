//! Backoff sequence abstractions.
//!
//! A backoff sequence yields the successive raw wait durations between two
//! attempts of a call. Sequences are plain iterators:
//!
//! - **Exponential**: starts at `min(base, max)`, multiplied each step, clamped to `max`
//! - **Constant**: one interval repeated forever
//! - **Intervals**: a caller-supplied sequence replayed verbatim (finite if the input is)
//!
//! A finite sequence running out is a give-up condition for the invoker.
//! Sequences are stateful, so every invocation builds a fresh one from a
//! factory; they are never shared across calls.

pub mod constant;
pub mod exponential;

use std::time::Duration;

pub use constant::{constant, intervals, Constant};
pub use exponential::{exponential, Exponential};

/// A source of successive wait durations.
///
/// Blanket-implemented for every sendable `Iterator<Item = Duration>`, so any
/// iterator adapter chain can be used as a backoff sequence.
pub trait Backoff: Iterator<Item = Duration> + Send {}

impl<T> Backoff for T where T: Iterator<Item = Duration> + Send {}
