//! Error types for the research loop

use std::time::Duration;
use thiserror::Error;

/// Result type alias for research operations
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Failures of the similarity layer.
///
/// These are never downgraded to "not a duplicate": a store that cannot
/// compare texts cannot guarantee it stops re-ingesting the same facts.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("Embedding backend returned an empty vector")]
    EmptyVector,

    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Embedding HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of the model, search and query-expansion collaborators.
///
/// Recovered locally by the orchestrator; the step is still charged.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} timed out after {elapsed:?}")]
    Timeout {
        collaborator: &'static str,
        elapsed: Duration,
    },

    #[error("Malformed response from {collaborator}: {message}")]
    MalformedResponse {
        collaborator: &'static str,
        message: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CollaboratorError {
    pub fn unavailable(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            message: message.into(),
        }
    }

    pub fn malformed(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            collaborator,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResearchError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
