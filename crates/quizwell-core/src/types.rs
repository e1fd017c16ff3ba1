//! Core content types.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

use crate::CoreError;

/// Number of answer options every item carries.
pub const OPTION_COUNT: usize = 4;

/// Default number of items requested when the caller does not say.
pub const DEFAULT_COUNT: usize = 10;

/// A single multiple-choice question.
///
/// `options` is a fixed-size array, so "exactly four options" holds by
/// construction. `correct_index` is checked by [`ContentItem::new`] and by
/// every loader that produces items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// The question text
    #[serde(rename = "question", alias = "prompt")]
    pub prompt: String,

    /// Answer options, in presentation order
    pub options: [String; OPTION_COUNT],

    /// Zero-based index into `options`
    #[serde(alias = "correctIndex", alias = "answer_index")]
    pub correct_index: u8,

    /// Optional explanation of the correct answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl ContentItem {
    /// Create an item, enforcing the non-empty prompt and index invariants.
    pub fn new(
        prompt: impl Into<String>,
        options: [String; OPTION_COUNT],
        correct_index: u8,
    ) -> Result<Self, CoreError> {
        let item = Self {
            prompt: prompt.into(),
            options,
            correct_index,
            explanation: None,
        };
        item.check()?;
        Ok(item)
    }

    /// Attach an explanation.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// The text of the correct option.
    pub fn correct_option(&self) -> &str {
        // check() guarantees the index is in range for constructed items;
        // fall back to the first option for hand-built values.
        self.options
            .get(usize::from(self.correct_index))
            .unwrap_or(&self.options[0])
    }

    /// Verify item invariants.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::InvalidItem("question text is empty".to_string()));
        }
        if usize::from(self.correct_index) >= OPTION_COUNT {
            return Err(CoreError::InvalidItem(format!(
                "correct_index {} out of range 0..{}",
                self.correct_index, OPTION_COUNT
            )));
        }
        Ok(())
    }
}

/// A request for generated content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    topic: String,
    count: NonZeroUsize,
}

impl ContentRequest {
    /// Create a request. `count` must be positive.
    pub fn new(topic: impl Into<String>, count: usize) -> Result<Self, CoreError> {
        let count = NonZeroUsize::new(count)
            .ok_or_else(|| CoreError::InvalidRequest("count must be positive".to_string()))?;
        Ok(Self {
            topic: topic.into(),
            count,
        })
    }

    /// Create a request, raising a zero `count` to one.
    pub fn at_least_one(topic: impl Into<String>, count: usize) -> Self {
        Self {
            topic: topic.into(),
            count: NonZeroUsize::new(count).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Requested topic, as given.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Requested number of items.
    pub fn count(&self) -> usize {
        self.count.get()
    }
}

/// Where a result's items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentSource {
    /// Generated by the upstream service
    Upstream,
    /// Selected from the fallback bank
    Fallback,
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::Upstream => write!(f, "UPSTREAM"),
            ContentSource::Fallback => write!(f, "FALLBACK"),
        }
    }
}

/// Outcome of one `generate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentResult {
    /// Items, in order
    pub items: Vec<ContentItem>,

    /// Where the items came from
    pub source: ContentSource,

    /// Topic as requested by the caller
    pub topic: String,

    /// Number of items returned
    pub count: usize,

    /// Number of items the caller asked for
    pub requested: usize,
}

impl ContentResult {
    /// Build an upstream-sourced result.
    pub fn upstream(topic: impl Into<String>, requested: usize, items: Vec<ContentItem>) -> Self {
        Self::tagged(ContentSource::Upstream, topic, requested, items)
    }

    /// Build a fallback-sourced result.
    pub fn fallback(topic: impl Into<String>, requested: usize, items: Vec<ContentItem>) -> Self {
        Self::tagged(ContentSource::Fallback, topic, requested, items)
    }

    fn tagged(
        source: ContentSource,
        topic: impl Into<String>,
        requested: usize,
        items: Vec<ContentItem>,
    ) -> Self {
        Self {
            count: items.len(),
            items,
            source,
            topic: topic.into(),
            requested,
        }
    }

    /// Whether the result came from the fallback bank.
    pub fn is_fallback(&self) -> bool {
        self.source == ContentSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> [String; 4] {
        ["a".into(), "b".into(), "c".into(), "d".into()]
    }

    #[test]
    fn test_item_rejects_out_of_range_index() {
        assert!(ContentItem::new("Q?", opts(), 4).is_err());
        assert!(ContentItem::new("Q?", opts(), 3).is_ok());
    }

    #[test]
    fn test_item_rejects_blank_prompt() {
        assert!(ContentItem::new("   ", opts(), 0).is_err());
    }

    #[test]
    fn test_correct_option() {
        let item = ContentItem::new("Q?", opts(), 2).unwrap();
        assert_eq!(item.correct_option(), "c");
    }

    #[test]
    fn test_item_wire_names() {
        let item = ContentItem::new("What is 2+2?", opts(), 1).unwrap();
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["question"], "What is 2+2?");
        assert_eq!(json["correct_index"], 1);
        assert!(json.get("explanation").is_none());

        let camel: ContentItem = serde_json::from_value(serde_json::json!({
            "question": "Q",
            "options": ["1", "2", "3", "4"],
            "correctIndex": 3
        }))
        .unwrap();
        assert_eq!(camel.correct_index, 3);
    }

    #[test]
    fn test_request_requires_positive_count() {
        assert!(ContentRequest::new("math", 0).is_err());
        let req = ContentRequest::new("math", 5).unwrap();
        assert_eq!(req.topic(), "math");
        assert_eq!(req.count(), 5);
        assert_eq!(ContentRequest::at_least_one("math", 0).count(), 1);
    }

    #[test]
    fn test_result_counts_items() {
        let item = ContentItem::new("Q?", opts(), 0).unwrap();
        let result = ContentResult::fallback("math", 10, vec![item.clone(), item]);
        assert_eq!(result.count, 2);
        assert_eq!(result.requested, 10);
        assert!(result.is_fallback());
        assert_eq!(
            serde_json::to_value(&result).unwrap()["source"],
            "FALLBACK"
        );
    }
}
