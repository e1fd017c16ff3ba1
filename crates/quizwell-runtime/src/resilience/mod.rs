//! Resilience patterns for quizwell-runtime.
//!
//! This module provides:
//! - Circuit breaker that short-circuits a failing upstream
//! - Exponential backoff policy
//! - Retrying caller that classifies and repeats upstream attempts

mod backoff;
mod circuit_breaker;
mod retry;

pub use backoff::{PolicyBackoff, RetryPolicy};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Clock, ManualClock, Permit,
    SystemClock,
};
pub use retry::RetryingCaller;
