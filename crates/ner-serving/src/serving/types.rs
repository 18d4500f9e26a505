//! Core types shared by every stage of the serving pipeline.
//!
//! - [`Token`]: a whitespace-delimited word with its character offsets
//! - [`Entity`]: a labelled character span, in the API wire shape
//! - [`TagVocabulary`]: the model's id → BIO label table
//! - [`InferenceError`]: the typed failure surfaced by backends and the service

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label used for tokens outside any entity.
pub const OUTSIDE_TAG: &str = "O";

// ============================================================================
// Token
// ============================================================================

/// A whitespace-delimited word of the input text.
///
/// `start`/`end` are half-open offsets counted in Unicode scalar values,
/// not bytes, so they line up with what API clients see as string indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

// ============================================================================
// Entity
// ============================================================================

/// A labelled character span over the original input.
///
/// Serializes to `{"start_index": .., "end_index": .., "entity": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub start_index: usize,
    pub end_index: usize,
    /// The BIO tag attached to the span, e.g. `B-BRAND`.
    pub entity: String,
}

impl Entity {
    pub fn new(start_index: usize, end_index: usize, entity: impl Into<String>) -> Self {
        Self {
            start_index,
            end_index,
            entity: entity.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.end_index == self.start_index
    }
}

// ============================================================================
// TagVocabulary
// ============================================================================

/// Mapping from model output ids to BIO label strings.
///
/// Ids the table does not know decode to [`OUTSIDE_TAG`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVocabulary {
    id_to_tag: BTreeMap<u32, String>,
}

impl Default for TagVocabulary {
    /// The retail product tagset: brand, type, volume and percent, plus the
    /// legacy `0` label some checkpoints were trained with.
    fn default() -> Self {
        let tags = [
            "O", "B-BRAND", "I-BRAND", "B-TYPE", "I-TYPE", "B-VOLUME", "I-VOLUME", "B-PERCENT",
            "I-PERCENT", "0",
        ];
        Self::from_pairs(
            tags.iter()
                .enumerate()
                .map(|(id, tag)| (id as u32, tag.to_string())),
        )
    }
}

/// Shape of the `config.json` that ships next to the model weights.
#[derive(Debug, Deserialize)]
struct SavedModelConfig {
    id_to_tag: BTreeMap<String, String>,
    #[serde(default)]
    max_len: Option<usize>,
}

impl TagVocabulary {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, String)>) -> Self {
        Self {
            id_to_tag: pairs.into_iter().collect(),
        }
    }

    /// Parse the `id_to_tag` object of a saved model config.
    ///
    /// JSON object keys are always strings, so `"3": "B-TYPE"` is accepted;
    /// keys that are not integers are rejected. Returns the vocabulary and the
    /// optional `max_len` the model was trained with.
    pub fn from_config_json(raw: &str) -> Result<(Self, Option<usize>), InferenceError> {
        let saved: SavedModelConfig = serde_json::from_str(raw).map_err(|e| {
            InferenceError::ConfigError(format!("Invalid model config.json: {}", e))
        })?;

        let mut id_to_tag = BTreeMap::new();
        for (key, tag) in saved.id_to_tag {
            let id = key.trim().parse::<u32>().map_err(|_| {
                InferenceError::ConfigError(format!("Non-integer tag id '{}' in id_to_tag", key))
            })?;
            id_to_tag.insert(id, tag);
        }

        if id_to_tag.is_empty() {
            return Err(InferenceError::ConfigError(
                "id_to_tag must contain at least one label".to_string(),
            ));
        }

        Ok((Self { id_to_tag }, saved.max_len))
    }

    /// Load the vocabulary from `<model_dir>/config.json`.
    pub fn load(model_dir: &Path) -> Result<(Self, Option<usize>), InferenceError> {
        let path = model_dir.join("config.json");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            InferenceError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_config_json(&raw)
    }

    pub fn tag(&self, id: u32) -> &str {
        self.id_to_tag
            .get(&id)
            .map(String::as_str)
            .unwrap_or(OUTSIDE_TAG)
    }

    pub fn len(&self) -> usize {
        self.id_to_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_tag.is_empty()
    }

    /// Number of output classes the classifier head must produce.
    pub fn num_labels(&self) -> usize {
        self.id_to_tag
            .keys()
            .next_back()
            .map(|max| *max as usize + 1)
            .unwrap_or(0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures surfaced by inference backends and the prediction service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// The backend is not loaded or has been shut down.
    #[error("model not ready: {0}")]
    ModelNotReady(String),

    /// The backend raised while running a forward pass.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The backend returned a tag sequence that does not line up with the tokens.
    #[error("backend returned {actual} tags for {expected} tokens")]
    TagCountMismatch { expected: usize, actual: usize },

    /// The request was malformed before it reached the model.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Model files or service settings are missing or malformed.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl InferenceError {
    /// Stable name recorded as the metrics error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelNotReady(_) => "ModelNotReady",
            Self::InferenceFailed(_) | Self::TagCountMismatch { .. } => "InferenceFailure",
            Self::InvalidInput(_) => "InvalidInput",
            Self::ConfigError(_) => "ConfigError",
        }
    }
}

pub type InferenceResult<T> = Result<T, InferenceError>;
