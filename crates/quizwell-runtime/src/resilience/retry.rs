//! Retrying upstream caller.
//!
//! One logical request is at most `max_retries + 1` provider calls. Each
//! attempt is classified into an [`UpstreamError`]; only retryable
//! variants are repeated, after the [`RetryPolicy`] delay for that
//! attempt. A validated payload ends the loop immediately.

use backon::Retryable;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use quizwell_core::{ContentItem, ContentRequest, ResponseValidator};

use crate::error::UpstreamError;
use crate::prompts;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};
use crate::resilience::RetryPolicy;

/// Executes one content request against the provider with retries.
pub struct RetryingCaller {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    policy: RetryPolicy,
    validator: ResponseValidator,
    retry_invalid_payloads: bool,
}

impl std::fmt::Debug for RetryingCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingCaller")
            .field("provider", &self.provider.name())
            .field("policy", &self.policy)
            .field("retry_invalid_payloads", &self.retry_invalid_payloads)
            .finish()
    }
}

impl RetryingCaller {
    /// Create a caller.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        completion: CompletionConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            completion,
            policy,
            validator: ResponseValidator::new(),
            retry_invalid_payloads: true,
        }
    }

    /// Whether malformed payloads consume the retry budget or fail fast.
    pub fn with_retry_invalid_payloads(mut self, retry: bool) -> Self {
        self.retry_invalid_payloads = retry;
        self
    }

    /// The provider in use.
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Run the request until it validates, fails permanently, or the
    /// retry budget runs out.
    ///
    /// On exhaustion the last classified error is wrapped in
    /// [`UpstreamError::ExhaustedRetries`]. Non-retryable errors are
    /// returned unchanged after the attempt that produced them.
    pub async fn call(&self, request: &ContentRequest) -> Result<Vec<ContentItem>, UpstreamError> {
        let instruction = prompts::build_instruction(request);
        let attempts = AtomicU32::new(0);

        let this = self;
        let instruction = instruction.as_str();
        let counter = &attempts;
        let attempt = move || async move {
            counter.fetch_add(1, Ordering::Relaxed);
            this.attempt(instruction).await
        };

        let result = attempt
            .retry(self.policy)
            .sleep(tokio::time::sleep)
            .when(|err: &UpstreamError| self.should_retry(err))
            .notify(|err: &UpstreamError, delay| {
                tracing::warn!(
                    topic = request.topic(),
                    attempt = attempts.load(Ordering::Relaxed),
                    delay = ?delay,
                    kind = err.kind(),
                    error = %err,
                    "Upstream attempt failed, retrying"
                );
            })
            .await;

        match result {
            Ok(items) => Ok(items),
            Err(err) if self.should_retry(&err) => Err(UpstreamError::ExhaustedRetries {
                attempts: attempts.load(Ordering::Relaxed),
                last: Box::new(err),
            }),
            Err(err) => Err(err),
        }
    }

    async fn attempt(&self, instruction: &str) -> Result<Vec<ContentItem>, UpstreamError> {
        let response = self
            .provider
            .complete(vec![ChatMessage::user(instruction)], &self.completion)
            .await?;
        Ok(self.validator.validate(&response.content)?)
    }

    fn should_retry(&self, err: &UpstreamError) -> bool {
        match err {
            UpstreamError::Validation(_) => self.retry_invalid_payloads,
            other => other.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, ProviderError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    const VALID: &str = r#"Sure! {"questions": [
        {"question": "2 + 2?", "options": ["3", "4", "5", "6"], "correct_index": 1}
    ]}"#;

    /// Provider that replays a script, then repeats its last entry.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        last: Mutex<Option<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            let step = match next {
                Some(step) => {
                    *self.last.lock() = Some(step.clone());
                    step
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or_else(|| Err(ProviderError::HttpError("empty script".into()))),
            };
            step.map(CompletionResponse::text)
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn status(code: u16) -> Result<String, ProviderError> {
        Err(ProviderError::ApiError {
            status: code,
            message: format!("status {code}"),
        })
    }

    fn caller(provider: Arc<ScriptedProvider>) -> RetryingCaller {
        RetryingCaller::new(provider, CompletionConfig::default(), RetryPolicy::default())
    }

    fn request() -> ContentRequest {
        ContentRequest::new("math", 1).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![status(404)]);
        let started = Instant::now();

        let err = caller(provider.clone()).call(&request()).await.unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(err, UpstreamError::Client { status: 404, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_budget_with_backoff() {
        let provider = ScriptedProvider::new(vec![status(503)]);
        let started = Instant::now();

        let err = caller(provider.clone()).call(&request()).await.unwrap_err();

        assert_eq!(provider.calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
        match err {
            UpstreamError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.to_string().contains("503"));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            Err(ProviderError::HttpError("connection reset".into())),
            Ok(VALID.to_string()),
        ]);
        let started = Instant::now();

        let items = caller(provider.clone()).call(&request()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].correct_option(), "4");
        assert_eq!(provider.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Ok("I cannot help with that.".to_string()),
            Ok(r#"{"questions": [{"question": "q", "options": ["a"], "correct_index": 0}]}"#
                .to_string()),
            Ok(VALID.to_string()),
        ]);

        let items = caller(provider.clone()).call(&request()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_fails_fast_when_disabled() {
        let provider = ScriptedProvider::new(vec![Ok("no json here".to_string())]);

        let err = caller(provider.clone())
            .with_retry_invalid_payloads(false)
            .call(&request())
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert!(matches!(err, UpstreamError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_configuration_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::NotConfigured(
            "no endpoint".into(),
        ))]);

        let err = caller(provider.clone()).call(&request()).await.unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert!(matches!(err, UpstreamError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_one_attempt() {
        let provider = ScriptedProvider::new(vec![status(500)]);
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };

        let err = RetryingCaller::new(provider.clone(), CompletionConfig::default(), policy)
            .call(&request())
            .await
            .unwrap_err();

        assert_eq!(provider.calls(), 1);
        assert!(matches!(
            err,
            UpstreamError::ExhaustedRetries { attempts: 1, .. }
        ));
    }
}
