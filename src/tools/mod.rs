//! Search and query-expansion collaborators
//!
//! The research loop talks to news retrieval through [`SearchTool`] and to
//! query rewriting through [`QueryExpander`]. Both are I/O adapters with no
//! state of their own.

use crate::error::CollaboratorError;
use crate::llm::{extract_string_list, string_list_schema, structured_system_prompt, LanguageModel};
use crate::models::Article;
use crate::state::estimate_tokens;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod yahoo;
pub use yahoo::YahooFinanceNews;

/// Finance news retrieval
#[async_trait]
pub trait SearchTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Articles matching `query`; empty when nothing matched
    async fn search(&self, query: &str) -> Result<Vec<Article>, CollaboratorError>;

    /// Full text for a single source identifier, when the backend can fetch one
    async fn read(&self, _source: &str) -> Result<Vec<Article>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Expanded queries and the estimated tokens spent producing them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub queries: Vec<String>,
    pub tokens: u64,
}

/// Rewrites one query into several related ones
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str, context: Option<&str>) -> Result<Expansion, CollaboratorError>;
}

/// Uses the query as-is
pub struct PassthroughExpander;

#[async_trait]
impl QueryExpander for PassthroughExpander {
    async fn expand(&self, query: &str, _context: Option<&str>) -> Result<Expansion, CollaboratorError> {
        Ok(Expansion {
            queries: vec![query.trim().to_string()],
            tokens: 0,
        })
    }
}

const EXPANSION_SYSTEM_PROMPT: &str = r#"You expand financial research queries into focused search queries.

Guidelines:
- Cover different aspects of the topic (company, sector, macro drivers)
- Keep each query short and specific; prefer tickers and company names
- Vary terminology between queries
- Output only the queries"#;

const EXPANSION_TEMPERATURE: f32 = 0.5;

/// Model-backed query expansion
pub struct ModelQueryExpander {
    model: Arc<dyn LanguageModel>,
}

impl ModelQueryExpander {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(query: &str, context: Option<&str>) -> String {
        let mut prompt = format!("Original query: {}", query);
        if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!("\nContext: {}", ctx));
        }
        prompt.push_str(
            "\nGenerate 3-5 expanded search queries that will help find comprehensive information about this topic.",
        );
        prompt
    }

    /// Queries from a free-text completion: a JSON list if present, else one per line
    fn parse_free_text(text: &str) -> Vec<String> {
        if let Some(list) = extract_string_list(text) {
            if !list.is_empty() {
                return list;
            }
        }

        text.lines()
            .map(strip_list_marker)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl QueryExpander for ModelQueryExpander {
    async fn expand(&self, query: &str, context: Option<&str>) -> Result<Expansion, CollaboratorError> {
        let prompt = Self::build_prompt(query, context);
        let schema = string_list_schema(&[("queries", "List of expanded search queries")]);

        // Structured calls carry the schema inside the system prompt
        let mut tokens = estimate_tokens(&prompt)
            + estimate_tokens(&structured_system_prompt(Some(EXPANSION_SYSTEM_PROMPT), &schema));

        let expanded = match self
            .model
            .generate_structured(&prompt, Some(EXPANSION_SYSTEM_PROMPT), &schema, Some(EXPANSION_TEMPERATURE))
            .await
        {
            Ok(value) => {
                tokens += estimate_tokens(&value.to_string());
                value
                    .get("queries")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            }
            Err(CollaboratorError::MalformedResponse { message, .. }) => {
                warn!(error = %message, "Structured expansion failed; parsing free text");
                tokens += estimate_tokens(&prompt) + estimate_tokens(EXPANSION_SYSTEM_PROMPT);
                let text = self
                    .model
                    .generate(&prompt, Some(EXPANSION_SYSTEM_PROMPT), Some(EXPANSION_TEMPERATURE))
                    .await?;
                tokens += estimate_tokens(&text);
                Self::parse_free_text(&text)
            }
            Err(e) => return Err(e),
        };

        let queries = normalize_queries(query, expanded);
        debug!(query = %query, expanded = queries.len(), tokens, "Query expanded");
        Ok(Expansion { queries, tokens })
    }
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let unnumbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let line = if unnumbered.len() < line.len() {
        unnumbered
            .strip_prefix(". ")
            .or_else(|| unnumbered.strip_prefix(") "))
            .unwrap_or(line)
    } else {
        line
    };
    line.trim_start_matches(['-', '*', '•'])
        .trim()
        .trim_matches('"')
        .trim()
}

/// Original query first, then unique non-empty expansions
pub fn normalize_queries(original: &str, expanded: Vec<String>) -> Vec<String> {
    let mut queries = vec![original.trim().to_string()];

    for candidate in expanded {
        let candidate = strip_list_marker(&candidate).to_string();
        if candidate.is_empty() {
            continue;
        }
        let duplicate = queries
            .iter()
            .any(|q| q.eq_ignore_ascii_case(&candidate));
        if !duplicate {
            queries.push(candidate);
        }
    }

    queries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AnswerMode, ScriptedModel};

    #[tokio::test]
    async fn test_passthrough() {
        let expansion = PassthroughExpander.expand("  TSLA deliveries ", None).await.unwrap();
        assert_eq!(expansion.queries, vec!["TSLA deliveries"]);
        assert_eq!(expansion.tokens, 0);
    }

    #[tokio::test]
    async fn test_structured_expansion() {
        let reply = r#"{"queries": ["Tesla Q3 deliveries", "tsla deliveries", "EV demand 2024"]}"#;
        let model = Arc::new(ScriptedModel::new(AnswerMode::Fail).with_reply(reply));
        let expander = ModelQueryExpander::new(model.clone());

        let expansion = expander.expand("TSLA deliveries", Some("earnings season")).await.unwrap();
        assert_eq!(
            expansion.queries,
            vec!["TSLA deliveries", "Tesla Q3 deliveries", "EV demand 2024"]
        );

        let prompts = model.prompts();
        assert!(prompts[0].contains("Context: earnings season"));
        assert!(expansion.tokens > estimate_tokens(&prompts[0]) + estimate_tokens(EXPANSION_SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn test_expansion_charges_prompt_and_response() {
        let reply = r#"{"queries": ["Nvidia data center revenue", "NVDA export controls"]}"#;
        let model = Arc::new(ScriptedModel::new(AnswerMode::Fail).with_reply(reply));
        let expander = ModelQueryExpander::new(model.clone());

        let expansion = expander.expand("NVDA outlook", None).await.unwrap();

        let schema = string_list_schema(&[("queries", "List of expanded search queries")]);
        let system = structured_system_prompt(Some(EXPANSION_SYSTEM_PROMPT), &schema);
        let response: Value = serde_json::from_str(reply).unwrap();
        let expected = estimate_tokens(&model.prompts()[0])
            + estimate_tokens(&system)
            + estimate_tokens(&response.to_string());
        assert_eq!(expansion.tokens, expected);
    }

    #[tokio::test]
    async fn test_free_text_fallback() {
        let model = Arc::new(
            ScriptedModel::new(AnswerMode::Fail)
                .with_reply("I think these would work well")
                .with_reply("1. Apple iPhone sales\n2. AAPL services revenue\n\n- \"Apple China demand\""),
        );
        let expander = ModelQueryExpander::new(model.clone());

        let expansion = expander.expand("AAPL outlook", None).await.unwrap();
        assert_eq!(
            expansion.queries,
            vec![
                "AAPL outlook",
                "Apple iPhone sales",
                "AAPL services revenue",
                "Apple China demand"
            ]
        );

        // Both calls are charged, including the discarded structured attempt
        let prompt_tokens = estimate_tokens(&model.prompts()[0]);
        assert!(expansion.tokens > 2 * prompt_tokens);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = Arc::new(ScriptedModel::new(AnswerMode::Fail));
        let expander = ModelQueryExpander::new(model);
        assert!(expander.expand("AAPL", None).await.is_err());
    }

    #[test]
    fn test_parse_free_text_prefers_json_list() {
        let parsed = ModelQueryExpander::parse_free_text("Here: [\"a\", \"b\"]");
        assert_eq!(parsed, vec!["a", "b"]);
    }

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("12. NVDA margins"), "NVDA margins");
        assert_eq!(strip_list_marker("3) AMD"), "AMD");
        assert_eq!(strip_list_marker("* \"Fed minutes\""), "Fed minutes");
        assert_eq!(strip_list_marker("3M earnings"), "3M earnings");
    }
}
