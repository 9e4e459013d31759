//! Research configuration
//!
//! Every threshold and limit lives in an explicit struct handed to the
//! component that needs it. `from_env` is the only place that reads the
//! process environment.

use crate::error::ResearchError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default near-duplicate threshold for cosine similarity
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Bounds and dedup thresholds for the memory store
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub max_facts: usize,
    pub max_pending_questions: usize,
    pub max_answered_questions: usize,
    pub max_search_queries: usize,
    pub max_visited_sources: usize,
    pub fact_similarity_threshold: f32,
    pub question_similarity_threshold: f32,
    pub query_similarity_threshold: f32,
}

impl MemoryConfig {
    /// Same bound for every collection
    pub fn uniform(max_items: usize, threshold: f32) -> Self {
        Self {
            max_facts: max_items,
            max_pending_questions: max_items,
            max_answered_questions: max_items,
            max_search_queries: max_items,
            max_visited_sources: max_items,
            fact_similarity_threshold: threshold,
            question_similarity_threshold: threshold,
            query_similarity_threshold: threshold,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::uniform(100, DEFAULT_SIMILARITY_THRESHOLD)
    }
}

/// Policy constants for the action planner
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_steps: u32,
    /// Tokens held back for the final answer ("beast mode" trigger)
    pub answer_reserve_tokens: u64,
    /// Below this many facts the planner keeps searching the original query
    pub min_facts: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            answer_reserve_tokens: 512,
            min_facts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAiCompatible,
    Gemini,
}

impl FromStr for LlmBackend {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "vllm" | "openai-compatible" => Ok(Self::OpenAiCompatible),
            "gemini" => Ok(Self::Gemini),
            other => Err(ResearchError::Config(format!(
                "unknown LLM_BACKEND '{}' (expected 'openai' or 'gemini')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub gemini_api_key: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAiCompatible,
            endpoint: "http://localhost:8000/v1".to_string(),
            model: "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
            api_key: "EMPTY".to_string(),
            gemini_api_key: String::new(),
            max_tokens: 8192,
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub max_results: usize,
    pub max_expanded_queries: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            max_results: 5,
            max_expanded_queries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    /// OpenAI-compatible embeddings endpoint; `None` selects the local hashing embedder
    pub endpoint: Option<String>,
    pub api_key: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            endpoint: None,
            api_key: "EMPTY".to_string(),
            dimension: 384,
        }
    }
}

/// Top-level configuration for one research invocation
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub token_budget: u64,
    pub collaborator_timeout: Duration,
    /// Facts handed to the model during a reasoning step
    pub reason_fact_limit: usize,
    /// Facts handed to the model for the final answer
    pub synthesis_fact_limit: usize,
    pub memory: MemoryConfig,
    pub planner: PlannerConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            token_budget: 4096,
            collaborator_timeout: Duration::from_secs(60),
            reason_fact_limit: 5,
            synthesis_fact_limit: 20,
            memory: MemoryConfig::default(),
            planner: PlannerConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl ResearchConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_string("VLLM_MODEL_NAME") {
            config.llm.model = v;
        }
        if let Some(v) = env_string("VLLM_ENDPOINT") {
            config.llm.endpoint = v;
        }
        if let Some(v) = env_string("VLLM_API_KEY") {
            config.llm.api_key = v;
        }
        if let Some(v) = env_string("GEMINI_API_KEY") {
            config.llm.gemini_api_key = v;
        }
        if let Some(v) = env_string("LLM_BACKEND") {
            config.llm.backend = v.parse()?;
        }
        if let Some(v) = env_parse("MAX_TOKENS")? {
            config.llm.max_tokens = v;
        }
        if let Some(v) = env_parse("LLM_TEMPERATURE")? {
            config.llm.temperature = v;
        }

        if let Some(v) = env_parse("TOKEN_BUDGET")? {
            config.token_budget = v;
        }
        if let Some(v) = env_parse("ANSWER_RESERVE_TOKENS")? {
            config.planner.answer_reserve_tokens = v;
        }
        if let Some(v) = env_parse("MIN_FACTS")? {
            config.planner.min_facts = v;
        }
        if let Some(v) = env_parse("MAX_STEPS")? {
            config.planner.max_steps = v;
        }
        if let Some(secs) = env_parse::<u64>("COLLABORATOR_TIMEOUT_SECS")? {
            config.collaborator_timeout = Duration::from_secs(secs);
        }

        if let Some(v) = env_parse("MAX_SEARCH_RESULTS")? {
            config.search.max_results = v;
        }
        if let Some(v) = env_parse("MAX_EXPANDED_QUERIES")? {
            config.search.max_expanded_queries = v;
        }
        if let Some(v) = env_string("YAHOO_FINANCE_BASE_URL") {
            config.search.base_url = v;
        }

        let max_items = env_parse("MAX_MEMORY_ITEMS")?.unwrap_or(config.memory.max_facts);
        let threshold = env_parse("SIMILARITY_THRESHOLD")?
            .unwrap_or(config.memory.fact_similarity_threshold);
        config.memory = MemoryConfig::uniform(max_items, threshold);

        if let Some(v) = env_string("EMBEDDING_MODEL") {
            config.embedding.model = v;
        }
        config.embedding.endpoint = env_string("EMBEDDING_ENDPOINT");
        if let Some(v) = env_string("EMBEDDING_API_KEY") {
            config.embedding.api_key = v;
        }
        if let Some(v) = env_parse("EMBEDDING_DIMENSION")? {
            config.embedding.dimension = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bounds = [
            ("max_facts", self.memory.max_facts),
            ("max_pending_questions", self.memory.max_pending_questions),
            ("max_answered_questions", self.memory.max_answered_questions),
            ("max_search_queries", self.memory.max_search_queries),
            ("max_visited_sources", self.memory.max_visited_sources),
        ];
        if let Some((name, _)) = bounds.iter().find(|(_, bound)| *bound == 0) {
            return Err(ResearchError::Config(format!("{} must be at least 1", name)));
        }

        let thresholds = [
            self.memory.fact_similarity_threshold,
            self.memory.question_similarity_threshold,
            self.memory.query_similarity_threshold,
        ];
        if thresholds.iter().any(|t| !(*t > 0.0 && *t <= 1.0)) {
            return Err(ResearchError::Config(
                "similarity thresholds must be in (0, 1]".to_string(),
            ));
        }

        if self.planner.answer_reserve_tokens >= self.token_budget {
            return Err(ResearchError::Config(format!(
                "answer reserve ({}) must be below the token budget ({})",
                self.planner.answer_reserve_tokens, self.token_budget
            )));
        }

        if self.embedding.dimension == 0 {
            return Err(ResearchError::Config(
                "embedding dimension must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ResearchError::Config(format!("invalid value '{}' for {}: {}", raw, key, e))
        }),
        None => Ok(None),
    }
}
