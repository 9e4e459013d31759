//! Scripted collaborators for unit tests. No network.

use crate::error::{CollaboratorError, EmbeddingError};
use crate::llm::LanguageModel;
use crate::models::Article;
use crate::similarity::Embedder;
use crate::tools::SearchTool;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const SCRIPTED_DIMENSION: usize = 64;

/// Two-dimensional unit vector whose cosine with `[1, 0]` is `score`
pub fn ranked_vector(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).max(0.0).sqrt()]
}

/// Embedder with hand-picked vectors.
///
/// Scripted vectors are zero-padded to a fixed dimension. Any other text gets
/// its own one-hot vector, allocated from the highest index down, so unknown
/// texts are orthogonal to each other and to low-index scripted vectors.
pub struct ScriptedEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    next_free: AtomicUsize,
    embedded: AtomicUsize,
    fail: bool,
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: Mutex::new(HashMap::new()),
            next_free: AtomicUsize::new(0),
            embedded: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with(self, text: &str, mut vector: Vec<f32>) -> Self {
        vector.resize(SCRIPTED_DIMENSION, 0.0);
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
        self
    }

    /// Total texts embedded across all calls
    pub fn texts_embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vectors = self.vectors.lock().unwrap();
        vectors
            .entry(text.to_string())
            .or_insert_with(|| {
                let n = self.next_free.fetch_add(1, Ordering::SeqCst);
                let mut v = vec![0.0; SCRIPTED_DIMENSION];
                v[SCRIPTED_DIMENSION - 1 - (n % SCRIPTED_DIMENSION)] = 1.0;
                v
            })
            .clone()
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::Unavailable("scripted embedder failure".to_string()));
        }
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// What a [`ScriptedModel`] does once its queued replies run out
#[derive(Debug, Clone)]
pub enum AnswerMode {
    /// Return the prompt unchanged
    Echo,
    Fixed(String),
    Fail,
}

/// Language model that replays queued replies, then falls back to an [`AnswerMode`]
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Option<String>>>,
    mode: AnswerMode,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(mode: AnswerMode) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            mode,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, reply: &str) -> Self {
        self.queue.lock().unwrap().push_back(Some(reply.to_string()));
        self
    }

    pub fn with_failure(self) -> Self {
        self.queue.lock().unwrap().push_back(None);
        self
    }

    /// Every prompt received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted model"
    }

    async fn generate(
        &self,
        prompt: &str,
        _system_prompt: Option<&str>,
        _temperature: Option<f32>,
    ) -> Result<String, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let queued = self.queue.lock().unwrap().pop_front();
        match queued {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(CollaboratorError::unavailable(self.name(), "scripted failure")),
            None => match &self.mode {
                AnswerMode::Echo => Ok(prompt.to_string()),
                AnswerMode::Fixed(text) => Ok(text.clone()),
                AnswerMode::Fail => Err(CollaboratorError::unavailable(self.name(), "scripted failure")),
            },
        }
    }
}

/// Returns the same articles for every query
pub struct StaticSearchTool {
    articles: Vec<Article>,
    pages: HashMap<String, Vec<Article>>,
    searches: AtomicUsize,
    reads: AtomicUsize,
}

impl StaticSearchTool {
    pub fn new(articles: Vec<Article>) -> Self {
        Self {
            articles,
            pages: HashMap::new(),
            searches: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Articles returned when `source` is read
    pub fn with_page(mut self, source: &str, articles: Vec<Article>) -> Self {
        self.pages.insert(source.to_string(), articles);
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchTool for StaticSearchTool {
    fn name(&self) -> &'static str {
        "static search"
    }

    async fn search(&self, _query: &str) -> Result<Vec<Article>, CollaboratorError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.articles.clone())
    }

    async fn read(&self, source: &str) -> Result<Vec<Article>, CollaboratorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.get(source).cloned().unwrap_or_default())
    }
}

pub struct FailingSearchTool;

#[async_trait]
impl SearchTool for FailingSearchTool {
    fn name(&self) -> &'static str {
        "failing search"
    }

    async fn search(&self, _query: &str) -> Result<Vec<Article>, CollaboratorError> {
        Err(CollaboratorError::unavailable(self.name(), "search backend down"))
    }
}

/// Sleeps before answering; pairs with paused tokio time
pub struct SlowSearchTool {
    pub delay: Duration,
}

#[async_trait]
impl SearchTool for SlowSearchTool {
    fn name(&self) -> &'static str {
        "slow search"
    }

    async fn search(&self, _query: &str) -> Result<Vec<Article>, CollaboratorError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

/// Three distinct finance articles
pub fn sample_articles() -> Vec<Article> {
    vec![
        Article::new(
            "Nvidia revenue jumps",
            "Data center sales rose 112% year over year",
            "https://finance.yahoo.com/news/nvda-1",
        ),
        Article::new(
            "AMD launches MI300",
            "New accelerator targets AI training workloads",
            "https://finance.yahoo.com/news/amd-2",
        ),
        Article::new(
            "Fed holds rates",
            "Policy rate unchanged at 5.25-5.5%",
            "https://finance.yahoo.com/news/fed-3",
        ),
    ]
}
