//! Retry and circuit-breaking primitives used by the acquisition engine.

mod breaker;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use retry::{MAX_JITTER_MS, RetryPolicy, backoff};
