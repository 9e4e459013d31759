//! Per-run research state
//!
//! Owned by the orchestrator and lent to the planner. Counters only move
//! forward, and only through [`ResearchState::record_step`].

use crate::memory::MemoryStore;

pub struct ResearchState {
    query: String,
    step: u32,
    tokens_spent: u64,
    token_budget: u64,
    memory: MemoryStore,
}

impl ResearchState {
    pub fn new(query: impl Into<String>, token_budget: u64, memory: MemoryStore) -> Self {
        Self {
            query: query.into(),
            step: 0,
            tokens_spent: 0,
            token_budget,
            memory,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn tokens_spent(&self) -> u64 {
        self.tokens_spent
    }

    pub fn token_budget(&self) -> u64 {
        self.token_budget
    }

    pub fn tokens_remaining(&self) -> u64 {
        self.token_budget.saturating_sub(self.tokens_spent)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut MemoryStore {
        &mut self.memory
    }

    /// Charge one completed action. Every step costs at least one token.
    pub(crate) fn record_step(&mut self, tokens: u64) {
        self.step = self.step.saturating_add(1);
        self.tokens_spent = self.tokens_spent.saturating_add(tokens.max(1));
    }
}

/// Rough token estimate for budget accounting: a quarter of the character count, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::similarity::{HashingEmbedder, SimilarityEngine};
    use std::sync::Arc;

    fn state(budget: u64) -> ResearchState {
        let engine = SimilarityEngine::new(Arc::new(HashingEmbedder::default()));
        ResearchState::new("AAPL outlook", budget, MemoryStore::new(MemoryConfig::default(), engine))
    }

    #[test]
    fn test_record_step_is_monotonic() {
        let mut s = state(100);
        assert_eq!(s.step(), 0);
        assert_eq!(s.tokens_remaining(), 100);

        s.record_step(30);
        s.record_step(0);
        assert_eq!(s.step(), 2);
        assert_eq!(s.tokens_spent(), 31);
        assert_eq!(s.tokens_remaining(), 69);
    }

    #[test]
    fn test_remaining_saturates() {
        let mut s = state(10);
        s.record_step(50);
        assert_eq!(s.tokens_remaining(), 0);
        assert_eq!(s.tokens_spent(), 50);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("€€€€€€€€"), 2);
    }
}
