//! Retry with backoff for remote calls.
//!
//! This crate provides a generic invocation engine that makes any fallible
//! async call resilient to transient failures:
//! - Backoff sequences (exponential with cap, constant, replayed intervals)
//! - Jitter functions applied to each computed wait
//! - The [`RetryInvoker`] loop with give-up bounds and lifecycle callbacks
//! - Pluggable wait primitives, including a [`HealthGatedWaiter`] shared by
//!   concurrent callers of the same endpoint

pub mod backoff;
pub mod gated;
pub mod invoker;
pub mod jitter;
pub mod state;
pub mod wait;

pub use backoff::{constant, exponential, intervals, Backoff, Constant, Exponential};
pub use gated::HealthGatedWaiter;
pub use invoker::RetryInvoker;
pub use jitter::{full_jitter, Jitter};
pub use state::RetryState;
pub use wait::{Sleep, Wait};
