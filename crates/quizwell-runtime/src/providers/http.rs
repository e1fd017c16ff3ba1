//! HTTP provider for the upstream generative service.
//!
//! Speaks the Anthropic Messages wire format: one POST per completion
//! with a JSON body, credential in the `x-api-key` header.
//!
//! The endpoint and credential are process configuration. Either one
//! missing is reported per call as [`ProviderError::NotConfigured`], so a
//! misconfigured process still serves fallback content.

use super::{
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Environment variable holding the upstream API key.
pub const API_KEY_ENV: &str = "QUIZWELL_API_KEY";

/// Environment variable holding the full upstream endpoint URL.
pub const API_URL_ENV: &str = "QUIZWELL_API_URL";

const API_VERSION: &str = "2023-06-01";

/// HTTP upstream provider.
pub struct HttpProvider {
    credential: Option<ApiCredential>,
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("credential", &self.credential)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl HttpProvider {
    /// Create a provider with an explicit endpoint and key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            credential: Some(ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "Upstream API key",
            )),
            endpoint: Some(endpoint.into()),
            client: reqwest::Client::new(),
        }
    }

    /// Create from `QUIZWELL_API_URL` and `QUIZWELL_API_KEY`.
    ///
    /// Missing values are not an error here; calls will fail with
    /// `NotConfigured` until they are provided.
    pub fn from_env() -> Self {
        let credential = ApiCredential::from_env(API_KEY_ENV, "Upstream API key")
            .map_err(|e| tracing::warn!(error = %e, "Upstream credential missing"))
            .ok();
        let endpoint = std::env::var(API_URL_ENV).ok();
        if endpoint.is_none() {
            tracing::warn!(env = API_URL_ENV, "Upstream endpoint missing");
        }

        Self {
            credential,
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    /// Create from JSON configuration with environment fallback.
    ///
    /// Reads `api_key` and `api_url`, falling back to the environment.
    pub fn from_config(config: &JsonValue) -> Self {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            API_KEY_ENV,
            "Upstream API key",
        )
        .map_err(|e| tracing::warn!(error = %e, "Upstream credential missing"))
        .ok();
        if let Some(credential) = &credential {
            tracing::debug!(source = %credential.source(), "Upstream credential loaded");
        }

        let endpoint = config["api_url"]
            .as_str()
            .map(str::to_string)
            .or_else(|| std::env::var(API_URL_ENV).ok());

        Self {
            credential,
            endpoint,
            client: reqwest::Client::new(),
        }
    }

    /// Whether both endpoint and credential are present.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.credential.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn target(&self) -> Result<(&str, &ApiCredential), ProviderError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "upstream endpoint not set: configure '{}'",
                API_URL_ENV
            ))
        })?;
        let credential = self.credential.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "upstream API key not set: configure '{}'",
                API_KEY_ENV
            ))
        })?;
        Ok((endpoint, credential))
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let (endpoint, credential) = self.target()?;

        let request = MessagesRequest {
            model: &config.model,
            max_tokens: config.max_tokens,
            messages: &messages,
        };

        let response = self
            .client
            .post(endpoint)
            .header("x-api-key", credential.expose())
            .header("anthropic-version", API_VERSION)
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    async fn health_check(&self) -> bool {
        self.is_configured()
    }

    fn name(&self) -> &str {
        "http"
    }
}
