//! Constant and replayed backoff sequences.

use std::iter::{self, Repeat};
use std::time::Duration;

/// The same interval, forever.
pub type Constant = Repeat<Duration>;

/// Backoff that always waits `interval`.
pub fn constant(interval: Duration) -> Constant {
    iter::repeat(interval)
}

/// Backoff replaying the given intervals verbatim.
///
/// The sequence is finite if `values` is; once it runs out the invoker gives
/// up and re-raises the last failure.
pub fn intervals<I>(values: I) -> I::IntoIter
where
    I: IntoIterator<Item = Duration>,
    I::IntoIter: Send,
{
    values.into_iter()
}
