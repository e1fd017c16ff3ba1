//! End-to-end behavior of the content service against scripted upstreams.

use async_trait::async_trait;
use quizwell_core::ContentSource;
use quizwell_runtime::{
    ChatMessage, CircuitState, CompletionConfig, CompletionResponse, LlmProvider, ManualClock,
    ProviderError, ResilientContentService, RetryPolicy, RuntimeConfig,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const VALID: &str = r#"Here you go:
{"questions": [
  {"question": "7 x 6?", "options": ["36", "42", "48", "54"], "correct_index": 1},
  {"question": "9 + 10?", "options": ["19", "21", "18", "20"], "correct_index": 0}
]}"#;

/// Upstream that fails with 503 until switched healthy.
struct SwitchableUpstream {
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableUpstream {
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn heal(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for SwitchableUpstream {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(CompletionResponse::text(VALID))
        } else {
            Err(ProviderError::ApiError {
                status: 503,
                message: "service unavailable".to_string(),
            })
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "switchable"
    }
}

fn single_attempt() -> RuntimeConfig {
    RuntimeConfig {
        retry: RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        ..RuntimeConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_sixth_call_short_circuits_after_five_failures() {
    let upstream = SwitchableUpstream::failing();
    let service = ResilientContentService::builder()
        .provider(upstream.clone())
        .build()
        .unwrap();

    for _ in 0..5 {
        let result = service.generate("math", 10).await;
        assert_eq!(result.source, ContentSource::Fallback);
        assert_eq!(result.count, 10);
    }
    let calls_before = upstream.calls();
    assert_eq!(calls_before, 5 * 4);

    let sixth = service.generate("math", 10).await;
    assert_eq!(sixth.source, ContentSource::Fallback);
    assert_eq!(sixth.items, service.bank().select("math", 10));
    assert_eq!(upstream.calls(), calls_before);

    let json = serde_json::to_value(service.stats()).unwrap();
    assert_eq!(json["circuitBreaker"]["state"], "OPEN");
    assert_eq!(json["usage"]["totalRequests"], 6);
    assert_eq!(json["usage"]["failedRequests"], 5);
    assert_eq!(json["usage"]["fallbackUsedCount"], 6);
    assert_eq!(json["usage"]["successfulRequests"], 0);
}

#[tokio::test]
async fn test_recovers_through_half_open() {
    let upstream = SwitchableUpstream::failing();
    let clock = Arc::new(ManualClock::new());
    let mut config = single_attempt();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.recovery_timeout = Duration::from_secs(60);
    config.circuit_breaker.success_threshold = 3;

    let service = ResilientContentService::builder()
        .provider(upstream.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .unwrap();

    assert!(service.generate("math", 2).await.is_fallback());
    assert_eq!(service.stats().circuit_breaker.state, CircuitState::Open);

    clock.advance(Duration::from_secs(30));
    assert!(service.generate("math", 2).await.is_fallback());
    assert_eq!(upstream.calls(), 1);

    upstream.heal();
    clock.advance(Duration::from_secs(31));

    let probe = service.generate("math", 2).await;
    assert_eq!(probe.source, ContentSource::Upstream);
    assert_eq!(probe.count, 2);
    assert_eq!(service.stats().circuit_breaker.state, CircuitState::HalfOpen);

    service.generate("math", 2).await;
    service.generate("math", 2).await;
    let stats = service.stats();
    assert_eq!(stats.circuit_breaker.state, CircuitState::Closed);
    assert_eq!(stats.usage.successful_requests, 3);
}

#[tokio::test]
async fn test_failed_probe_reopens() {
    let upstream = SwitchableUpstream::failing();
    let clock = Arc::new(ManualClock::new());
    let mut config = single_attempt();
    config.circuit_breaker.failure_threshold = 1;

    let service = ResilientContentService::builder()
        .provider(upstream.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .unwrap();

    service.generate("science", 1).await;
    clock.advance(Duration::from_secs(61));

    assert!(service.generate("science", 1).await.is_fallback());
    assert_eq!(upstream.calls(), 2);
    assert_eq!(service.stats().circuit_breaker.state, CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_keep_counters_consistent() {
    let upstream = SwitchableUpstream::failing();
    let service = Arc::new(
        ResilientContentService::builder()
            .provider(upstream.clone())
            .config(single_attempt())
            .build()
            .unwrap(),
    );

    let calls = (0..40).map(|i| {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.generate(&format!("topic-{i}"), 3).await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        let result = result.unwrap();
        assert!(result.is_fallback());
        assert!(result.count <= 3);
    }

    let stats = service.stats();
    let usage = &stats.usage;
    assert_eq!(usage.total_requests, 40);
    assert_eq!(usage.successful_requests, 0);
    assert_eq!(usage.fallback_used_count, 40);
    assert_eq!(usage.failed_requests as usize, upstream.calls());
    assert!(usage.failed_requests >= 5);
    assert_eq!(stats.circuit_breaker.state, CircuitState::Open);
}

#[tokio::test]
async fn test_reset_reopens_upstream_path_and_keeps_stats() {
    let upstream = SwitchableUpstream::failing();
    let mut config = single_attempt();
    config.circuit_breaker.failure_threshold = 2;

    let service = ResilientContentService::builder()
        .provider(upstream.clone())
        .config(config)
        .build()
        .unwrap();

    service.generate("history", 1).await;
    service.generate("history", 1).await;
    assert_eq!(service.stats().circuit_breaker.state, CircuitState::Open);

    service.reset_breaker();
    upstream.heal();

    let result = service.generate("history", 1).await;
    assert_eq!(result.source, ContentSource::Upstream);

    let usage = service.stats().usage;
    assert_eq!(usage.total_requests, 3);
    assert_eq!(usage.failed_requests, 2);
    assert_eq!(usage.successful_requests, 1);
}
