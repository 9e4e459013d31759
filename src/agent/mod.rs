//! Research orchestrator - drives the research loop
//!
//! INITIALIZE → PLAN → EXECUTE → EVALUATE → (PLAN …) → SYNTHESIZE → DONE

use crate::config::{LlmBackend, PlannerConfig, ResearchConfig};
use crate::error::{CollaboratorError, ResearchError};
use crate::llm::{
    string_list_schema, structured_system_prompt, GeminiClient, LanguageModel, OpenAiCompatibleClient,
};
use crate::memory::{MemoryStore, REASONING_SOURCE};
use crate::models::{Action, Article, Phase, ResearchOutcome, StopReason};
use crate::planner::ActionPlanner;
use crate::similarity::{Embedder, HashingEmbedder, OpenAiEmbedder, SimilarityEngine};
use crate::state::{estimate_tokens, ResearchState};
use crate::tools::{ModelQueryExpander, QueryExpander, SearchTool, YahooFinanceNews};
use crate::Result;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

const EXPANDER: &str = "query expander";

const REASON_SYSTEM_PROMPT: &str = r#"You are a financial researcher analyzing information about stocks and markets.
Your task is to analyze the provided facts, extract insights, and identify gaps in information.
Follow these guidelines:
1. Extract key insights relevant to the focus question.
2. Point out important connections or patterns in the data.
3. List follow-up questions that would fill gaps in knowledge.
4. Stay on the focus question."#;

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a financial research analyst answering from gathered evidence.
Synthesize the provided facts into a well-structured answer.
Follow these guidelines:
1. Answer the original research question directly.
2. Cite sources where relevant.
3. Acknowledge limitations or uncertainties in the available information.
4. Give actionable conclusions only when the facts support them."#;

const REASON_TEMPERATURE: f32 = 0.3;
const SYNTHESIS_TEMPERATURE: f32 = 0.2;

/// Per-call overrides of the configured limits
#[derive(Debug, Clone, Default)]
pub struct ResearchOptions {
    pub max_steps: Option<u32>,
    pub token_budget: Option<u64>,
    /// Log each step at `info` instead of `debug`
    pub verbose: bool,
}

/// What one executed action did
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub tokens: u64,
    pub facts_added: usize,
    pub questions_added: usize,
    /// Collaborator failure recovered during the step
    pub failure: Option<CollaboratorError>,
}

impl StepOutcome {
    fn describe(&self) -> String {
        match &self.failure {
            Some(e) => format!("failed ({})", e),
            None => format!(
                "+{} facts, +{} questions",
                self.facts_added, self.questions_added
            ),
        }
    }
}

/// Runs research invocations against a fixed set of collaborators.
///
/// Holds no per-run state: every call builds its own memory and counters,
/// so one `Researcher` can serve concurrent calls.
pub struct Researcher {
    config: ResearchConfig,
    engine: SimilarityEngine,
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchTool>,
    expander: Arc<dyn QueryExpander>,
}

impl Researcher {
    pub fn new(
        config: ResearchConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchTool>,
        expander: Arc<dyn QueryExpander>,
    ) -> Self {
        Self {
            config,
            engine: SimilarityEngine::new(embedder),
            model,
            search,
            expander,
        }
    }

    /// Wire the HTTP-backed collaborators named by `config`
    pub fn from_config(config: ResearchConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.collaborator_timeout;

        let embedder: Arc<dyn Embedder> = match &config.embedding.endpoint {
            Some(endpoint) => Arc::new(OpenAiEmbedder::new(
                endpoint,
                &config.embedding.model,
                &config.embedding.api_key,
                timeout,
            )?),
            None => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
        };

        let model: Arc<dyn LanguageModel> = match config.llm.backend {
            LlmBackend::OpenAiCompatible => Arc::new(OpenAiCompatibleClient::new(&config.llm, timeout)?),
            LlmBackend::Gemini => Arc::new(GeminiClient::new(&config.llm, timeout)?),
        };

        let search: Arc<dyn SearchTool> = Arc::new(YahooFinanceNews::new(&config.search, timeout)?);
        let expander: Arc<dyn QueryExpander> = Arc::new(ModelQueryExpander::new(model.clone()));

        info!(
            embedder = embedder.name(),
            model = model.name(),
            search = search.name(),
            "Researcher configured"
        );

        Ok(Self::new(config, embedder, model, search, expander))
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Research `query` and return the answer text
    pub async fn research(&self, query: &str, options: ResearchOptions) -> Result<String> {
        let outcome = self.run(query, options, &CancellationToken::new()).await?;
        Ok(outcome.answer)
    }

    /// Research `query` to completion.
    ///
    /// Cancellation is observed before each planning step: an in-flight
    /// collaborator call finishes, then the loop synthesizes from what it has.
    /// Only embedding failures abort the call.
    pub async fn run(
        &self,
        query: &str,
        options: ResearchOptions,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("research", run_id = %run_id);
        self.run_inner(run_id, query, options, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        query: &str,
        options: ResearchOptions,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome> {
        let start_time = Instant::now();
        let mut reasoning_trace = Vec::new();

        // === INITIALIZE ===
        let mut phase = Phase::Initializing;
        let token_budget = options.token_budget.unwrap_or(self.config.token_budget);
        let planner = ActionPlanner::new(PlannerConfig {
            max_steps: options.max_steps.unwrap_or(self.config.planner.max_steps),
            ..self.config.planner.clone()
        });

        info!(
            query = %query,
            max_steps = planner.config().max_steps,
            token_budget,
            "Research started"
        );

        let mut state = self.initialize(query, token_budget).await?;
        reasoning_trace.push(format!("INIT: {}", state.query()));

        let stop_reason = loop {
            // === PLAN ===
            phase = advance(phase, Phase::Planning);

            if cancel.is_cancelled() {
                info!(step = state.step(), action = %Action::GiveUp, "Cancellation observed");
                reasoning_trace.push(format!("PLAN: {} (cancelled)", Action::GiveUp));
                break StopReason::Cancelled;
            }

            let decision = planner.decide(&state);
            if let Some(reason) = decision.rule.stop_reason() {
                reasoning_trace.push(format!("PLAN: {} ({})", decision.action, reason));
                break reason;
            }

            // === EXECUTE ===
            phase = advance(phase, Phase::Executing);
            let step = state.step() + 1;
            let outcome = self.execute(&mut state, &decision.action).await?;

            // === EVALUATE ===
            phase = advance(phase, Phase::Evaluating);
            reasoning_trace.push(format!(
                "STEP {}: {} -> {}",
                step,
                decision.action,
                outcome.describe()
            ));

            let summary = state.memory().get_summary();
            if options.verbose {
                info!(
                    step,
                    action = decision.action.kind(),
                    tokens = outcome.tokens,
                    tokens_spent = state.tokens_spent(),
                    facts = summary.facts,
                    pending_questions = summary.pending_questions,
                    "Step complete"
                );
            } else {
                debug!(
                    step,
                    action = decision.action.kind(),
                    tokens = outcome.tokens,
                    tokens_spent = state.tokens_spent(),
                    facts = summary.facts,
                    pending_questions = summary.pending_questions,
                    "Step complete"
                );
            }
        };

        // === SYNTHESIZE ===
        phase = advance(phase, Phase::Synthesizing);
        let (answer, used_fallback) = self.synthesize(&state).await;
        reasoning_trace.push(if used_fallback {
            "SYNTHESIZE: fallback answer from raw facts".to_string()
        } else {
            "SYNTHESIZE: answer generated".to_string()
        });

        phase = advance(phase, Phase::Done);

        info!(
            steps = state.step(),
            tokens_spent = state.tokens_spent(),
            stop_reason = %stop_reason,
            used_fallback,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Research complete"
        );

        Ok(ResearchOutcome {
            run_id,
            query: state.query().to_string(),
            answer,
            steps: state.step(),
            tokens_spent: state.tokens_spent(),
            final_phase: phase,
            stop_reason,
            used_fallback,
            memory: state.memory().get_summary(),
            reasoning_trace,
        })
    }

    /// Fresh state for `query`, with the query queued as the first open question
    pub async fn initialize(&self, query: &str, token_budget: u64) -> Result<ResearchState> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResearchError::Config("research query must not be empty".to_string()));
        }

        let mut memory = MemoryStore::new(self.config.memory.clone(), self.engine.clone());
        memory.add_question(query).await?;

        Ok(ResearchState::new(query, token_budget, memory))
    }

    /// Execute one action and charge it to `state`.
    ///
    /// Collaborator failures are recovered into [`StepOutcome::failure`];
    /// embedding failures propagate. The step is recorded either way.
    pub async fn execute(&self, state: &mut ResearchState, action: &Action) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();

        let result = match action {
            Action::Search { query } => self.execute_search(state, query, &mut outcome).await,
            Action::Read { source } => self.execute_read(state, source, &mut outcome).await,
            Action::Reason { focus } => self.execute_reason(state, focus, &mut outcome).await,
            Action::Answer | Action::GiveUp => Ok(()),
        };

        let result = match result {
            Ok(()) => Ok(()),
            Err(ResearchError::Collaborator(e)) => {
                warn!(
                    step = state.step() + 1,
                    action = action.kind(),
                    error = %e,
                    "Step failed; continuing"
                );
                outcome.failure = Some(e);
                Ok(())
            }
            Err(e) => Err(e),
        };

        state.record_step(outcome.tokens);
        result.map(|()| outcome)
    }

    async fn execute_search(
        &self,
        state: &mut ResearchState,
        query: &str,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let result = self.search_and_ingest(state, query, outcome).await;
        state.memory_mut().mark_question_answered(query);
        result
    }

    async fn search_and_ingest(
        &self,
        state: &mut ResearchState,
        query: &str,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        if !state.memory_mut().add_search_query(query).await? {
            debug!(query = %query, "Query already searched; skipping");
            return Ok(());
        }

        let context = (query != state.query()).then(|| state.query().to_string());
        outcome.tokens += estimate_tokens(query);

        let expanded = match self
            .bounded(EXPANDER, self.expander.expand(query, context.as_deref()))
            .await
        {
            Ok(expansion) => {
                outcome.tokens += expansion.tokens;
                if expansion.queries.is_empty() {
                    vec![query.to_string()]
                } else {
                    expansion.queries
                }
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Query expansion failed; using the query as-is");
                vec![query.to_string()]
            }
        };

        let mut first_error = None;
        let mut searched = 0;

        for q in expanded.iter().take(self.config.search.max_expanded_queries.max(1)) {
            outcome.tokens += estimate_tokens(q);
            match self.bounded(self.search.name(), self.search.search(q)).await {
                Ok(articles) => {
                    searched += 1;
                    debug!(query = %q, results = articles.len(), "Search returned");
                    self.ingest_articles(state, articles, outcome).await?;
                }
                Err(e) => {
                    warn!(query = %q, error = %e, "Search failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if searched == 0 => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn execute_read(
        &self,
        state: &mut ResearchState,
        source: &str,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        if !state.memory_mut().add_visited_source(source) {
            debug!(source = %source, "Source already visited; skipping");
            return Ok(());
        }

        let articles = self.bounded(self.search.name(), self.search.read(source)).await?;
        self.ingest_articles(state, articles, outcome).await
    }

    async fn ingest_articles(
        &self,
        state: &mut ResearchState,
        articles: Vec<Article>,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let step = state.step() + 1;
        let memory = state.memory_mut();

        for article in articles {
            let content = article.fact_content();
            outcome.tokens += estimate_tokens(&content);

            let mut metadata = Map::new();
            metadata.insert("kind".to_string(), json!("article"));
            metadata.insert("step".to_string(), json!(step));

            if memory.add_fact(content, article.fact_source(), metadata).await? {
                outcome.facts_added += 1;
            }
            memory.add_visited_source(article.source);
        }

        Ok(())
    }

    async fn execute_reason(
        &self,
        state: &mut ResearchState,
        focus: &str,
        outcome: &mut StepOutcome,
    ) -> Result<()> {
        let facts = state
            .memory()
            .get_relevant_facts(focus, self.config.reason_fact_limit)
            .await?
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Focus Question: {}\n\nFacts:\n{}\n\nAnalyze these facts to provide insights about the focus question. \
             Then identify 2-3 specific follow-up questions that would help fill gaps in knowledge.",
            focus,
            if facts.is_empty() { "(none yet)" } else { facts.as_str() }
        );
        let schema = string_list_schema(&[
            ("insights", "Key insights extracted from the facts"),
            ("follow_up_questions", "Follow-up questions to fill knowledge gaps"),
        ]);

        outcome.tokens += estimate_tokens(&prompt)
            + estimate_tokens(&structured_system_prompt(Some(REASON_SYSTEM_PROMPT), &schema));
        let response = self
            .bounded(
                self.model.name(),
                self.model.generate_structured(
                    &prompt,
                    Some(REASON_SYSTEM_PROMPT),
                    &schema,
                    Some(REASON_TEMPERATURE),
                ),
            )
            .await?;
        outcome.tokens += estimate_tokens(&response.to_string());

        let step = state.step() + 1;
        let memory = state.memory_mut();

        for insight in string_items(&response, "insights") {
            let mut metadata = Map::new();
            metadata.insert("kind".to_string(), json!("insight"));
            metadata.insert("step".to_string(), json!(step));

            if memory.add_fact(insight, REASONING_SOURCE, metadata).await? {
                outcome.facts_added += 1;
            }
        }

        for question in string_items(&response, "follow_up_questions") {
            if memory.add_question(question).await? {
                debug!(question = %question, "Follow-up question queued");
                outcome.questions_added += 1;
            }
        }

        memory.mark_question_answered(focus);
        Ok(())
    }

    /// Final answer, or the raw-facts fallback when synthesis fails.
    /// The flag is true for the fallback.
    async fn synthesize(&self, state: &ResearchState) -> (String, bool) {
        match self.try_synthesize(state).await {
            Ok(answer) => (answer, false),
            Err(e) => {
                warn!(error = %e, "Synthesis failed; assembling fallback answer");
                (self.fallback_answer(state), true)
            }
        }
    }

    async fn try_synthesize(&self, state: &ResearchState) -> Result<String> {
        let facts = state
            .memory()
            .get_relevant_facts(state.query(), self.config.synthesis_fact_limit)
            .await?
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Research Question: {}\n\nFacts collected during research:\n{}\n\n\
             Based on these facts, provide a comprehensive answer to the research question.",
            state.query(),
            if facts.is_empty() { "(no facts were found)" } else { facts.as_str() }
        );

        let answer = self
            .bounded(
                self.model.name(),
                self.model.generate(&prompt, Some(SYNTHESIS_SYSTEM_PROMPT), Some(SYNTHESIS_TEMPERATURE)),
            )
            .await?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(CollaboratorError::malformed(self.model.name(), "empty answer").into());
        }
        Ok(answer.to_string())
    }

    /// Deterministic answer built from stored facts, no model call
    fn fallback_answer(&self, state: &ResearchState) -> String {
        let facts = state.memory().format_facts(Some(self.config.synthesis_fact_limit));
        if facts.is_empty() {
            format!(
                "No findings were gathered for \"{}\", so no answer could be produced.",
                state.query()
            )
        } else {
            format!(
                "An answer could not be synthesized. Findings gathered for \"{}\":\n{}",
                state.query(),
                facts
            )
        }
    }

    /// Run a collaborator call under the configured timeout
    async fn bounded<T, F>(&self, collaborator: &'static str, call: F) -> std::result::Result<T, CollaboratorError>
    where
        F: Future<Output = std::result::Result<T, CollaboratorError>>,
    {
        let limit = self.config.collaborator_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                collaborator,
                elapsed: limit,
            }),
        }
    }
}

fn advance(from: Phase, to: Phase) -> Phase {
    debug!(from = ?from, to = ?to, "Phase transition");
    to
}

fn string_items<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a str> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
