//! Research memory store
//!
//! Five bounded, insertion-ordered collections. Facts, pending questions and
//! search queries are deduplicated semantically on insert; visited sources
//! by exact match. Eviction always drops the oldest entry.

use crate::config::MemoryConfig;
use crate::error::EmbeddingError;
use crate::memory::item::{fingerprint, MemoryItem, Question};
use crate::models::MemorySummary;
use crate::similarity::SimilarityEngine;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::debug;

/// FIFO collection that drops from the front once over its bound
#[derive(Debug, Clone)]
struct BoundedLog<T> {
    items: VecDeque<T>,
    bound: usize,
}

impl<T> BoundedLog<T> {
    fn new(bound: usize) -> Self {
        Self {
            items: VecDeque::new(),
            bound: bound.max(1),
        }
    }

    /// Append and return how many old entries were evicted
    fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        let mut evicted = 0;
        while self.items.len() > self.bound {
            self.items.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Memory for one research invocation
pub struct MemoryStore {
    config: MemoryConfig,
    engine: SimilarityEngine,
    facts: BoundedLog<MemoryItem>,
    pending_questions: BoundedLog<Question>,
    answered_questions: BoundedLog<Question>,
    search_queries: BoundedLog<String>,
    visited_sources: BoundedLog<String>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig, engine: SimilarityEngine) -> Self {
        Self {
            facts: BoundedLog::new(config.max_facts),
            pending_questions: BoundedLog::new(config.max_pending_questions),
            answered_questions: BoundedLog::new(config.max_answered_questions),
            search_queries: BoundedLog::new(config.max_search_queries),
            visited_sources: BoundedLog::new(config.max_visited_sources),
            config,
            engine,
        }
    }

    // =============================
    // Facts
    // =============================

    /// Store a fact unless it near-duplicates one already held.
    ///
    /// Returns `Ok(false)` without touching state for duplicates. The
    /// duplicate check runs before eviction, so a rejected fact never
    /// displaces an older one.
    pub async fn add_fact(
        &mut self,
        content: impl Into<String>,
        source: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<bool, EmbeddingError> {
        let content = content.into();
        let print = fingerprint(&content);

        if self.facts.iter().any(|f| f.fingerprint() == print) {
            debug!(fingerprint = %print, "Exact duplicate fact rejected");
            return Ok(false);
        }

        let candidate = self.embed_against_facts(&content).await?;

        let best = self
            .engine
            .max_similarity(&candidate, self.facts.iter().filter_map(MemoryItem::embedding))?;

        if let Some(score) = best {
            if score >= self.config.fact_similarity_threshold {
                debug!(
                    fingerprint = %print,
                    similarity = score,
                    threshold = self.config.fact_similarity_threshold,
                    "Near-duplicate fact rejected"
                );
                return Ok(false);
            }
        }

        let item = MemoryItem::new(content, source, metadata);
        item.cache_embedding(candidate);

        let evicted = self.facts.push(item);
        debug!(
            fingerprint = %print,
            facts = self.facts.len(),
            evicted,
            "Fact stored"
        );

        Ok(true)
    }

    /// Embed `text` in one batch with any stored fact still lacking a cached
    /// vector, filling those caches on the way.
    async fn embed_against_facts(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let missing: Vec<&MemoryItem> = self
            .facts
            .iter()
            .filter(|f| f.embedding().is_none())
            .collect();

        let mut batch = Vec::with_capacity(missing.len() + 1);
        batch.push(text);
        batch.extend(missing.iter().map(|f| f.content()));

        let mut vectors = self.engine.embed(&batch).await?;
        let rest = vectors.split_off(1);
        let candidate = vectors.pop().ok_or(EmbeddingError::EmptyVector)?;

        for (item, vector) in missing.iter().zip(&rest) {
            item.cache_embedding(vector.clone());
        }

        Ok(candidate)
    }

    /// Top `max_facts` facts by similarity to `query`, ties broken by
    /// insertion order. Embeds the query once; stored facts reuse their
    /// cached vectors.
    pub async fn get_relevant_facts(
        &self,
        query: &str,
        max_facts: usize,
    ) -> Result<Vec<&MemoryItem>, EmbeddingError> {
        if max_facts == 0 || self.facts.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embed_against_facts(query).await?;

        let mut scored = Vec::with_capacity(self.facts.len());
        for (idx, item) in self.facts.iter().enumerate() {
            let vector = item.embedding().ok_or(EmbeddingError::EmptyVector)?;
            scored.push((idx, item, self.engine.similarity(&query_vec, vector)?));
        }

        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(max_facts)
            .map(|(_, item, _)| item)
            .collect())
    }

    pub fn facts(&self) -> impl Iterator<Item = &MemoryItem> {
        self.facts.iter()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Most recent `max_facts` facts as a bullet list, oldest first
    pub fn format_facts(&self, max_facts: Option<usize>) -> String {
        let skip = max_facts
            .map(|max| self.facts.len().saturating_sub(max))
            .unwrap_or(0);

        self.facts
            .iter()
            .skip(skip)
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    }

    // =============================
    // Questions
    // =============================

    /// Queue a question unless it near-duplicates a *pending* one.
    ///
    /// Answered questions are not consulted: a gap can legitimately reopen.
    pub async fn add_question(&mut self, question: impl Into<String>) -> Result<bool, EmbeddingError> {
        let question = question.into().trim().to_string();
        if question.is_empty() {
            return Ok(false);
        }

        let pending: Vec<&str> = self
            .pending_questions
            .iter()
            .map(|q| q.text.as_str())
            .collect();

        if pending.contains(&question.as_str())
            || self
                .engine
                .is_duplicate(&question, &pending, self.config.question_similarity_threshold)
                .await?
        {
            debug!(question = %question, "Duplicate pending question rejected");
            return Ok(false);
        }

        let evicted = self.pending_questions.push(Question::pending(question));
        debug!(
            pending = self.pending_questions.len(),
            evicted,
            "Question queued"
        );
        Ok(true)
    }

    /// Move an exactly matching pending question to answered.
    ///
    /// Unknown questions (never asked, or evicted) are ignored. Returns
    /// whether a question moved.
    pub fn mark_question_answered(&mut self, question: &str) -> bool {
        let Some(pos) = self.pending_questions.iter().position(|q| q.text == question) else {
            return false;
        };

        let Some(moved) = self.pending_questions.items.remove(pos) else {
            return false;
        };

        self.answered_questions.push(moved.into_answered());
        debug!(question = %question, "Question answered");
        true
    }

    /// Pending questions, oldest first
    pub fn get_unanswered_questions(&self) -> Vec<&str> {
        self.pending_questions.iter().map(|q| q.text.as_str()).collect()
    }

    pub fn next_pending_question(&self) -> Option<&str> {
        self.pending_questions.iter().next().map(|q| q.text.as_str())
    }

    pub fn answered_questions(&self) -> impl Iterator<Item = &Question> {
        self.answered_questions.iter()
    }

    // =============================
    // Search queries & sources
    // =============================

    /// Record a search query unless it near-duplicates an earlier one
    pub async fn add_search_query(&mut self, query: impl Into<String>) -> Result<bool, EmbeddingError> {
        let query = query.into().trim().to_string();
        if query.is_empty() {
            return Ok(false);
        }

        let previous: Vec<&str> = self.search_queries.iter().map(String::as_str).collect();
        if previous.contains(&query.as_str())
            || self
                .engine
                .is_duplicate(&query, &previous, self.config.query_similarity_threshold)
                .await?
        {
            debug!(query = %query, "Repeat search query");
            return Ok(false);
        }

        self.search_queries.push(query);
        Ok(true)
    }

    pub fn has_searched(&self, query: &str) -> bool {
        self.search_queries.iter().any(|q| q == query.trim())
    }

    /// Record a source identifier; exact match only
    pub fn add_visited_source(&mut self, source: impl Into<String>) -> bool {
        let source = source.into();
        if self.visited_sources.iter().any(|s| *s == source) {
            return false;
        }
        self.visited_sources.push(source);
        true
    }

    pub fn has_visited(&self, source: &str) -> bool {
        self.visited_sources.iter().any(|s| s == source)
    }

    pub fn get_summary(&self) -> MemorySummary {
        MemorySummary {
            facts: self.facts.len(),
            pending_questions: self.pending_questions.len(),
            answered_questions: self.answered_questions.len(),
            search_queries: self.search_queries.len(),
            visited_sources: self.visited_sources.len(),
        }
    }
}
