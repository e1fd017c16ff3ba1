//! Runtime configuration.
//!
//! Layered, lowest precedence first: built-in defaults, an optional YAML
//! file, then `QUIZWELL_*` environment variables. Durations are written
//! as humantime strings (`"60s"`, `"500ms"`) or as whole seconds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde adapter for `Duration` as humantime text or whole seconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Secs(secs) => Ok(Duration::from_secs(secs)),
            Repr::Text(text) => {
                humantime::parse_duration(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}

/// Configuration for the resilient content service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry budget and backoff
    pub retry: RetryPolicy,

    /// Upstream model name
    pub model: String,

    /// Maximum tokens the upstream may generate
    pub max_tokens: u32,

    /// Per-attempt request timeout
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Treat malformed upstream payloads as retryable
    pub retry_invalid_payloads: bool,

    /// Items requested when the caller does not say
    pub default_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let completion = CompletionConfig::default();
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            model: completion.model,
            max_tokens: completion.max_tokens,
            request_timeout: completion.timeout,
            retry_invalid_payloads: true,
            default_count: quizwell_core::DEFAULT_COUNT,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None::<&Path>)
    }

    /// Defaults, then an optional YAML file, then the environment.
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_str(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML on top of defaults. Missing keys keep their default.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply `QUIZWELL_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QUIZWELL_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = parse_number("QUIZWELL_FAILURE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_RECOVERY_TIMEOUT") {
            self.circuit_breaker.recovery_timeout = parse_duration("QUIZWELL_RECOVERY_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_HALF_OPEN_SUCCESSES") {
            self.circuit_breaker.success_threshold =
                parse_number("QUIZWELL_HALF_OPEN_SUCCESSES", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_SINGLE_PROBE") {
            self.circuit_breaker.single_probe = parse_number("QUIZWELL_SINGLE_PROBE", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_MAX_RETRIES") {
            self.retry.max_retries = parse_number("QUIZWELL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_BASE_DELAY") {
            self.retry.base_delay = parse_duration("QUIZWELL_BASE_DELAY", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_MAX_DELAY") {
            self.retry.max_delay = parse_duration("QUIZWELL_MAX_DELAY", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_BACKOFF_MULTIPLIER") {
            self.retry.backoff_multiplier = parse_number("QUIZWELL_BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_REQUEST_TIMEOUT") {
            self.request_timeout = parse_duration("QUIZWELL_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("QUIZWELL_MODEL") {
            self.model = v;
        }
        Ok(())
    }

    /// Reject settings the breaker or retry driver cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.success_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.base_delay must not exceed retry.max_delay".to_string(),
            ));
        }
        if self.default_count == 0 {
            return Err(ConfigError::Invalid(
                "default_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Completion settings for the provider.
    pub fn completion(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            timeout: self.request_timeout,
        }
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
