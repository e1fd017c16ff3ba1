//! # quizwell-runtime
//!
//! Resilient access to the upstream question generator.
//!
//! This crate wraps an upstream [`LlmProvider`] with retries, a circuit
//! breaker and the deterministic fallback bank from `quizwell-core`.
//! [`ResilientContentService::generate`] never fails: when the upstream
//! is unavailable, misconfigured, or returns malformed content, the
//! caller gets bank content tagged `FALLBACK`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quizwell_runtime::{HttpProvider, ResilientContentService, RuntimeConfig};
//!
//! let service = ResilientContentService::builder()
//!     .provider(Arc::new(HttpProvider::from_env()))
//!     .config(RuntimeConfig::from_env()?)
//!     .build()?;
//!
//! let result = service.generate("math", 10).await;
//! println!("{} items from {}", result.count, result.source);
//! ```

pub mod config;
pub mod error;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod service;
pub mod stats;

pub use config::{ConfigError, RuntimeConfig};
pub use error::{RuntimeError, TransientCause, UpstreamError};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, CredentialSource,
    LlmProvider, ProviderError,
};
#[cfg(feature = "http")]
pub use providers::{HttpProvider, API_KEY_ENV, API_URL_ENV};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Clock, ManualClock,
    Permit, RetryPolicy, RetryingCaller, SystemClock,
};
pub use service::{ResilientContentService, ResilientContentServiceBuilder};
pub use stats::{ServiceStats, StatsRecorder, UsageStats};
