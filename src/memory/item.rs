//! Items held by the research memory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Source tag for facts produced by the reasoning step
pub const REASONING_SOURCE: &str = "reasoning";

/// A retained unit of research content with provenance.
///
/// Immutable once built. The embedding is filled by the first similarity
/// check that needs it and lives exactly as long as the item.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryItem {
    content: String,
    source: String,
    metadata: Map<String, Value>,
    added_at: DateTime<Utc>,
    fingerprint: String,
    #[serde(skip)]
    embedding: OnceLock<Vec<f32>>,
}

impl MemoryItem {
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        let content = content.into();
        let fingerprint = fingerprint(&content);

        Self {
            content,
            source: source.into(),
            metadata,
            added_at: Utc::now(),
            fingerprint,
            embedding: OnceLock::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }

    /// Cache the embedding. A second call keeps the first vector.
    pub(crate) fn cache_embedding(&self, vector: Vec<f32>) {
        let _ = self.embedding.set(vector);
    }
}

impl fmt::Display for MemoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Source: {})", self.content, self.source)
    }
}

/// Whitespace- and case-insensitive content hash (16 hex chars)
pub fn fingerprint(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionState {
    Pending,
    Answered,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub state: QuestionState,
}

impl Question {
    pub fn pending(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            state: QuestionState::Pending,
        }
    }

    pub(crate) fn into_answered(self) -> Self {
        Self {
            state: QuestionState::Answered,
            ..self
        }
    }
}
