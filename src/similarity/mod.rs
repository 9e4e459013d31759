//! Similarity engine
//!
//! Turns text into fixed-length vectors through an [`Embedder`] and compares
//! them with cosine similarity. Only the memory store talks to this module.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub mod hashing;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

/// Backend that turns text into vectors.
///
/// Implementations must be deterministic for identical input and return one
/// vector per input, in input order, all of the same dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Cosine similarity in [-1, 1]. Zero-magnitude vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Embedding + comparison front end shared by the memory store
#[derive(Clone)]
pub struct SimilarityEngine {
    embedder: Arc<dyn Embedder>,
}

impl SimilarityEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Embed a batch, checking the backend kept its side of the contract
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed(texts).await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }

        let dim = vectors[0].len();
        if dim == 0 {
            return Err(EmbeddingError::EmptyVector);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(EmbeddingError::DimensionMismatch {
                left: dim,
                right: bad.len(),
            });
        }

        debug!(
            embedder = self.embedder.name(),
            batch = texts.len(),
            dimension = dim,
            "Embedded batch"
        );

        Ok(vectors)
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
        cosine_similarity(a, b)
    }

    /// Highest similarity between `candidate` and any of `existing`
    pub fn max_similarity<'a, I>(
        &self,
        candidate: &[f32],
        existing: I,
    ) -> Result<Option<f32>, EmbeddingError>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut best: Option<f32> = None;
        for other in existing {
            let score = cosine_similarity(candidate, other)?;
            best = Some(best.map_or(score, |b| b.max(score)));
        }
        Ok(best)
    }

    /// True iff the candidate's best match among `existing` reaches `threshold`
    pub async fn is_duplicate(
        &self,
        candidate: &str,
        existing: &[&str],
        threshold: f32,
    ) -> Result<bool, EmbeddingError> {
        if existing.is_empty() {
            return Ok(false);
        }

        let mut batch = Vec::with_capacity(existing.len() + 1);
        batch.push(candidate);
        batch.extend_from_slice(existing);

        let vectors = self.embed(&batch).await?;
        let (candidate_vec, rest) = vectors.split_first().ok_or(EmbeddingError::EmptyVector)?;

        let best = self.max_similarity(candidate_vec, rest.iter().map(Vec::as_slice))?;
        Ok(best.is_some_and(|score| score >= threshold))
    }
}
