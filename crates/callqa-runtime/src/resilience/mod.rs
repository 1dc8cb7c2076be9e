//! Resilience patterns for callqa-runtime.
//!
//! Calls to the evaluation backend and every durable step run through a
//! [`RetryExecutor`]. Callers decide what is retryable by choosing what they
//! run through it.

mod retry;

pub use retry::{AttemptTimedOut, Backoff, RetryError, RetryExecutor, RetryPolicy};
