//! Resilient content service.
//!
//! The single entry point callers use. It combines the circuit breaker,
//! the retrying caller and the fallback bank so that `generate` always
//! returns content:
//!
//! 1. Count the request.
//! 2. Ask the breaker for a permit. Denied: answer from the bank.
//! 3. Permitted: run the retrying caller. Success closes the loop with
//!    the breaker; failure records a breaker failure and answers from
//!    the bank.

use std::sync::Arc;

use quizwell_core::{ContentRequest, ContentResult, FallbackBank};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::providers::LlmProvider;
use crate::resilience::{CircuitBreaker, Clock, Permit, RetryingCaller, SystemClock};
use crate::stats::{ServiceStats, StatsRecorder};

/// Content generation with retries, a circuit breaker and a static fallback.
///
/// Construct once and share as `Arc<ResilientContentService>`. All
/// mutable state lives behind the breaker's and the stats' own locks.
pub struct ResilientContentService {
    caller: RetryingCaller,
    breaker: CircuitBreaker,
    stats: StatsRecorder,
    bank: Arc<FallbackBank>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for ResilientContentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientContentService")
            .field("caller", &self.caller)
            .field("breaker", &self.breaker)
            .field("config", &self.config)
            .finish()
    }
}

impl ResilientContentService {
    /// Start building a service.
    pub fn builder() -> ResilientContentServiceBuilder {
        ResilientContentServiceBuilder::new()
    }

    /// Generate `count` items about `topic`.
    ///
    /// Never fails. Upstream errors are logged and counted, and the
    /// fallback bank answers instead.
    pub async fn generate(&self, topic: &str, count: usize) -> ContentResult {
        self.stats.record_request();

        let Some(permit) = self.breaker.permit() else {
            self.stats.record_short_circuit();
            tracing::warn!(
                topic,
                state = %self.breaker.state(),
                "Circuit denied upstream attempt, serving fallback"
            );
            return self.fallback(topic, count);
        };

        let probe = ProbeGuard::arm(&self.breaker, permit);
        self.stats.record_attempt();

        let request = ContentRequest::at_least_one(topic, count);
        let outcome = self.caller.call(&request).await;
        probe.disarm();

        match outcome {
            Ok(items) => {
                self.breaker.record_success(permit);
                self.stats.record_success();
                tracing::debug!(topic, items = items.len(), "Upstream content served");
                ContentResult::upstream(topic, count, items)
            }
            Err(err) => {
                self.breaker.record_failure(permit);
                self.stats.record_failure();
                tracing::warn!(
                    topic,
                    kind = err.kind(),
                    error = %err,
                    state = %self.breaker.state(),
                    "Upstream failed, serving fallback"
                );
                self.fallback(topic, count)
            }
        }
    }

    /// Generate the configured default number of items.
    pub async fn generate_default(&self, topic: &str) -> ContentResult {
        self.generate(topic, self.config.default_count).await
    }

    /// Usage counters plus a consistent breaker snapshot.
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            usage: self.stats.snapshot(),
            circuit_breaker: self.breaker.snapshot(),
        }
    }

    /// Administrative: force the breaker closed. Usage counters are kept.
    pub fn reset_breaker(&self) {
        let before = self.breaker.state();
        self.breaker.reset();
        tracing::info!(previous = %before, "Circuit breaker reset by operator");
    }

    /// Whether the upstream provider reports itself usable.
    pub async fn health_check(&self) -> bool {
        self.caller.provider().health_check().await
    }

    /// The fallback bank in use.
    pub fn bank(&self) -> &FallbackBank {
        &self.bank
    }

    /// Effective configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn fallback(&self, topic: &str, count: usize) -> ContentResult {
        ContentResult::fallback(topic, count, self.bank.select(topic, count))
    }
}

/// Gives back a half-open probe if `generate` is dropped mid-call.
struct ProbeGuard<'a> {
    breaker: Option<&'a CircuitBreaker>,
    permit: Permit,
}

impl<'a> ProbeGuard<'a> {
    fn arm(breaker: &'a CircuitBreaker, permit: Permit) -> Self {
        Self {
            breaker: permit.is_probe().then_some(breaker),
            permit,
        }
    }

    fn disarm(mut self) {
        self.breaker = None;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker {
            breaker.release_probe(self.permit);
        }
    }
}

/// Builder for [`ResilientContentService`].
pub struct ResilientContentServiceBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    config: RuntimeConfig,
    bank: Option<Arc<FallbackBank>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ResilientContentServiceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            provider: None,
            config: RuntimeConfig::default(),
            bank: None,
            clock: None,
        }
    }

    /// Set the upstream provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an alternate fallback bank instead of the built-in one.
    pub fn bank(mut self, bank: FallbackBank) -> Self {
        self.bank = Some(Arc::new(bank));
        self
    }

    /// Read breaker time from `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the service.
    pub fn build(self) -> Result<ResilientContentService, RuntimeError> {
        self.config.validate()?;

        let provider = self
            .provider
            .ok_or_else(|| RuntimeError::ProviderNotConfigured("No provider set".to_string()))?;

        let bank = match self.bank {
            Some(bank) => bank,
            None => Arc::new(FallbackBank::builtin()?.clone()),
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let breaker = CircuitBreaker::with_clock(self.config.circuit_breaker.clone(), clock);

        let caller = RetryingCaller::new(provider, self.config.completion(), self.config.retry)
            .with_retry_invalid_payloads(self.config.retry_invalid_payloads);

        tracing::debug!(
            provider = caller.provider().name(),
            bank_version = bank.version(),
            "Content service built"
        );

        Ok(ResilientContentService {
            caller,
            breaker,
            stats: StatsRecorder::new(),
            bank,
            config: self.config,
        })
    }
}

impl Default for ResilientContentServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
