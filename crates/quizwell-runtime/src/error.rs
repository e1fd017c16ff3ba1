//! Error taxonomy for upstream calls.

use quizwell_core::{BankError, ValidationError};
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::providers::ProviderError;

/// Why a retryable failure happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientCause {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("undecodable response: {0}")]
    Decode(String),
}

/// Classified failure of one logical upstream request.
///
/// The variant alone decides whether a retry is worthwhile; see
/// [`UpstreamError::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Endpoint or credential missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 4xx other than 429.
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// 429, 5xx or transport failure.
    #[error("transient error: {0}")]
    Transient(#[from] TransientCause),

    /// Structurally invalid payload.
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),

    /// Retry budget spent; carries the last classified error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<UpstreamError>,
    },
}

impl UpstreamError {
    /// Whether the request may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transient(_) | UpstreamError::Validation(_) => true,
            UpstreamError::Configuration(_)
            | UpstreamError::Client { .. }
            | UpstreamError::ExhaustedRetries { .. } => false,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Configuration(_) => "configuration",
            UpstreamError::Client { .. } => "client",
            UpstreamError::Transient(_) => "transient",
            UpstreamError::Validation(_) => "validation",
            UpstreamError::ExhaustedRetries { .. } => "exhausted",
        }
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => TransientCause::RateLimited { retry_after: None }.into(),
            400..=499 => UpstreamError::Client { status, message },
            _ => TransientCause::Server { status, message }.into(),
        }
    }
}

impl From<ProviderError> for UpstreamError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(msg) => UpstreamError::Configuration(msg),
            ProviderError::ApiError { status, message } => Self::from_status(status, message),
            ProviderError::RateLimited { retry_after } => {
                TransientCause::RateLimited { retry_after }.into()
            }
            ProviderError::HttpError(msg) => TransientCause::Transport(msg).into(),
            ProviderError::Timeout(after) => TransientCause::Timeout(after).into(),
            ProviderError::ParseError(msg) => TransientCause::Decode(msg).into(),
        }
    }
}

/// Errors from building the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fallback bank error: {0}")]
    Bank(#[from] BankError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            UpstreamError::from_status(404, "nope"),
            UpstreamError::Client { status: 404, .. }
        ));
        assert!(matches!(
            UpstreamError::from_status(400, ""),
            UpstreamError::Client { .. }
        ));
        assert!(UpstreamError::from_status(429, "").is_retryable());
        assert!(UpstreamError::from_status(500, "").is_retryable());
        assert!(UpstreamError::from_status(503, "").is_retryable());
        assert!(!UpstreamError::from_status(499, "").is_retryable());
    }

    #[test]
    fn test_provider_error_mapping() {
        let cfg: UpstreamError = ProviderError::NotConfigured("no key".into()).into();
        assert_eq!(cfg.kind(), "configuration");
        assert!(!cfg.is_retryable());

        let transport: UpstreamError = ProviderError::HttpError("reset".into()).into();
        assert!(transport.is_retryable());

        let timeout: UpstreamError = ProviderError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(timeout.kind(), "transient");

        let limited: UpstreamError = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        }
        .into();
        assert!(matches!(
            limited,
            UpstreamError::Transient(TransientCause::RateLimited { .. })
        ));
    }

    #[test]
    fn test_validation_is_retryable() {
        let err: UpstreamError = ValidationError::NoPayload.into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_exhausted_carries_cause() {
        let last = UpstreamError::from_status(503, "overloaded");
        let err = UpstreamError::ExhaustedRetries {
            attempts: 4,
            last: Box::new(last.clone()),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("overloaded"));
        assert_eq!(
            std::error::Error::source(&err).map(|s| s.to_string()),
            Some(last.to_string())
        );
    }
}
