//! Static fallback content.
//!
//! The bank is the last line of defense: when the upstream path is
//! unavailable or exhausted, [`FallbackBank::select`] picks pre-built
//! items deterministically. Selection never fails and never fabricates
//! items.
//!
//! Topic resolution, first match wins:
//! 1. Lower-case the requested topic
//! 2. Exact key match
//! 3. First key (in bank order) that contains the request, or is contained by it
//! 4. The default topic

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::ContentItem;

/// Embedded reference data.
const BUILTIN_BANK_YAML: &str = include_str!("../data/fallback_bank.yaml");

/// Default topic name used by the reference data.
pub const DEFAULT_TOPIC: &str = "general";

static BUILTIN: OnceLock<Result<FallbackBank, String>> = OnceLock::new();

/// Errors from loading a bank.
#[derive(Error, Debug)]
pub enum BankError {
    #[error("Failed to read bank file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse bank YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Bank has no topics")]
    Empty,

    #[error("Duplicate topic key: {0}")]
    DuplicateTopic(String),

    #[error("Default topic '{0}' is not in the bank")]
    MissingDefault(String),

    #[error("Invalid item {index} in topic '{topic}': {reason}")]
    InvalidItem {
        topic: String,
        index: usize,
        reason: String,
    },

    #[error("Built-in bank is invalid: {0}")]
    Builtin(String),
}

/// One topic and its ordered items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTopic {
    /// Lowercase topic key
    pub key: String,

    /// Items in their stored order
    #[serde(default)]
    pub items: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct BankFile {
    #[serde(default = "default_version")]
    version: u32,

    #[serde(default = "default_topic")]
    default_topic: String,

    topics: Vec<BankTopic>,
}

fn default_version() -> u32 {
    1
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

/// Immutable topic → items table.
#[derive(Debug, Clone)]
pub struct FallbackBank {
    version: u32,
    topics: Vec<BankTopic>,
    default_topic: String,
}

impl FallbackBank {
    /// The built-in reference bank, parsed once.
    pub fn builtin() -> Result<&'static FallbackBank, BankError> {
        BUILTIN
            .get_or_init(|| Self::from_yaml_str(BUILTIN_BANK_YAML).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| BankError::Builtin(e.clone()))
    }

    /// Parse a bank from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, BankError> {
        let file: BankFile = serde_yaml::from_str(yaml)?;
        Self::new(file.version, file.topics, file.default_topic)
    }

    /// Load a bank from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, BankError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Build a bank from topics, validating keys and items.
    ///
    /// Keys are lower-cased. Topic order is preserved and drives partial
    /// matching.
    pub fn new(
        version: u32,
        topics: Vec<BankTopic>,
        default_topic: impl Into<String>,
    ) -> Result<Self, BankError> {
        if topics.is_empty() {
            return Err(BankError::Empty);
        }

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(topics.len());
        for mut topic in topics {
            topic.key = topic.key.to_lowercase();
            if !seen.insert(topic.key.clone()) {
                return Err(BankError::DuplicateTopic(topic.key));
            }
            for (index, item) in topic.items.iter().enumerate() {
                item.check().map_err(|e| BankError::InvalidItem {
                    topic: topic.key.clone(),
                    index,
                    reason: e.to_string(),
                })?;
            }
            normalized.push(topic);
        }

        let default_topic = default_topic.into().to_lowercase();
        if !seen.contains(&default_topic) {
            return Err(BankError::MissingDefault(default_topic));
        }

        Ok(Self {
            version,
            topics: normalized,
            default_topic,
        })
    }

    /// Resolve a requested topic to a bank key.
    pub fn resolve(&self, topic: &str) -> &str {
        let wanted = topic.to_lowercase();

        if let Some(exact) = self.topics.iter().find(|t| t.key == wanted) {
            return &exact.key;
        }

        if let Some(partial) = self
            .topics
            .iter()
            .find(|t| wanted.contains(t.key.as_str()) || t.key.contains(wanted.as_str()))
        {
            return &partial.key;
        }

        &self.default_topic
    }

    /// Select up to `count` items for a topic.
    ///
    /// Total over every input: unknown topics resolve to the default
    /// topic, and a `count` beyond what the topic holds returns all of it.
    pub fn select(&self, topic: &str, count: usize) -> Vec<ContentItem> {
        let key = self.resolve(topic);
        self.items(key)
            .map(|items| items.iter().take(count).cloned().collect())
            .unwrap_or_default()
    }

    /// Items stored under an exact key.
    pub fn items(&self, key: &str) -> Option<&[ContentItem]> {
        self.topics
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.items.as_slice())
    }

    /// Topic keys in iteration order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.key.as_str())
    }

    /// Number of items under an exact key (0 if absent).
    pub fn len_of(&self, key: &str) -> usize {
        self.items(key).map_or(0, <[ContentItem]>::len)
    }

    /// The default topic key.
    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    /// Data version.
    pub fn version(&self) -> u32 {
        self.version
    }
}
