//! # quizwell-core
//!
//! Deterministic building blocks for quizwell.
//!
//! This crate never talks to the network. It provides:
//! - The content model ([`ContentItem`], [`ContentRequest`], [`ContentResult`])
//! - [`ResponseValidator`], which turns raw upstream text into items or rejects it
//! - [`FallbackBank`], the static, total fallback used when upstream is unavailable
//!
//! ## Example
//!
//! ```rust,ignore
//! use quizwell_core::{FallbackBank, ResponseValidator};
//!
//! let bank = FallbackBank::builtin()?;
//! let items = bank.select("spanish", 3);
//!
//! let parsed = ResponseValidator::new().validate(r#"{"questions": []}"#)?;
//! ```

pub mod bank;
pub mod types;
pub mod validator;

pub use bank::{BankError, BankTopic, FallbackBank, DEFAULT_TOPIC};
pub use types::{
    ContentItem, ContentRequest, ContentResult, ContentSource, DEFAULT_COUNT, OPTION_COUNT,
};
pub use validator::{extract_payload, ResponseValidator, ValidationError};

use thiserror::Error;

/// Errors from constructing core values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),
}
