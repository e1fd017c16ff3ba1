//! Validation of raw upstream output.
//!
//! Upstream text is turned into content in explicit steps:
//!
//! 1. **Extract** the JSON object substring (first `{` to last `}`)
//! 2. **Parse** it as JSON
//! 3. **Shape**: require a `questions` array (`items` accepted)
//! 4. **Normalize** known key aliases on every element
//! 5. **Schema**: check every element against the embedded item schema
//! 6. **Decode** into typed [`ContentItem`]s
//!
//! Validation is all-or-nothing. One bad element rejects the whole
//! payload; there is no best-effort partial result.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::ContentItem;

/// Embedded item schema.
const CONTENT_ITEM_SCHEMA_JSON: &str = include_str!("../schema/content_item.schema.json");

/// Compiled item schema (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Field names that may hold the question sequence, in lookup order.
const SEQUENCE_FIELDS: [&str; 2] = ["questions", "items"];

/// Accepted aliases, as (canonical, alias) pairs.
const KEY_ALIASES: [(&str, &str); 3] = [
    ("question", "prompt"),
    ("correct_index", "correctIndex"),
    ("correct_index", "answer_index"),
];

lazy_static! {
    /// Greedy match from the first `{` to the last `}`.
    static ref OBJECT_SPAN: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// Errors from response validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no structured payload found")]
    NoPayload,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("malformed payload shape: {0}")]
    MalformedShape(String),

    #[error("invalid item at index {index}: {}", .reasons.join("; "))]
    InvalidItem { index: usize, reasons: Vec<String> },

    #[error("item schema unavailable: {0}")]
    SchemaUnavailable(String),
}

/// Locate the JSON object substring in raw upstream text.
///
/// Returns the span from the first `{` to the last `}` inclusive, or
/// `None` when the text has no such span. The span is not guaranteed to
/// parse; that is the next step's job.
pub fn extract_payload(raw: &str) -> Option<&str> {
    OBJECT_SPAN.find(raw).map(|m| m.as_str())
}

fn item_schema() -> Result<&'static jsonschema::Validator, ValidationError> {
    let compiled = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: Value = serde_json::from_str(CONTENT_ITEM_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;
        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    compiled
        .as_ref()
        .map_err(|e| ValidationError::SchemaUnavailable(e.clone()))
}

/// Validates raw upstream text into content items.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    _private: (),
}

impl ResponseValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate raw upstream output.
    pub fn validate(&self, raw: &str) -> Result<Vec<ContentItem>, ValidationError> {
        let payload = extract_payload(raw).ok_or(ValidationError::NoPayload)?;

        let value: Value = serde_json::from_str(payload)
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;

        let elements = self.sequence(value)?;
        let schema = item_schema()?;

        let mut items = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            items.push(self.validate_element(schema, index, element)?);
        }

        tracing::debug!(items = items.len(), "Upstream payload validated");
        Ok(items)
    }

    /// Pull the question sequence out of the parsed payload.
    fn sequence(&self, value: Value) -> Result<Vec<Value>, ValidationError> {
        let Value::Object(mut object) = value else {
            return Err(ValidationError::MalformedShape(
                "payload is not an object".to_string(),
            ));
        };

        let field = SEQUENCE_FIELDS
            .iter()
            .find(|f| object.contains_key(**f))
            .ok_or_else(|| {
                ValidationError::MalformedShape("missing `questions` field".to_string())
            })?;

        match object.remove(*field) {
            Some(Value::Array(elements)) => Ok(elements),
            _ => Err(ValidationError::MalformedShape(format!(
                "`{}` is not a sequence",
                field
            ))),
        }
    }

    fn validate_element(
        &self,
        schema: &jsonschema::Validator,
        index: usize,
        element: Value,
    ) -> Result<ContentItem, ValidationError> {
        let element = match element {
            Value::Object(object) => Value::Object(normalize_keys(object)),
            other => other,
        };

        let reasons: Vec<String> = schema
            .iter_errors(&element)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{} at {}", e, path)
                }
            })
            .collect();
        if !reasons.is_empty() {
            return Err(ValidationError::InvalidItem { index, reasons });
        }

        let item: ContentItem =
            serde_json::from_value(element).map_err(|e| ValidationError::InvalidItem {
                index,
                reasons: vec![e.to_string()],
            })?;

        item.check().map_err(|e| ValidationError::InvalidItem {
            index,
            reasons: vec![e.to_string()],
        })?;

        Ok(item)
    }
}

/// Rename alias keys to their canonical names unless the canonical key is present.
fn normalize_keys(mut object: Map<String, Value>) -> Map<String, Value> {
    for (canonical, alias) in KEY_ALIASES {
        if !object.contains_key(canonical) {
            if let Some(value) = object.remove(alias) {
                object.insert(canonical.to_string(), value);
            }
        }
    }
    object
}
