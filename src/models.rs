//! Core data models for the research loop

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Actions =================
//

/// Next step chosen by the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Search { query: String },
    Read { source: String },
    Reason { focus: String },
    Answer,
    GiveUp,
}

impl Action {
    /// `Answer` and `GiveUp` end the loop and go straight to synthesis
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Answer | Action::GiveUp)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Search { .. } => "search",
            Action::Read { .. } => "read",
            Action::Reason { .. } => "reason",
            Action::Answer => "answer",
            Action::GiveUp => "give_up",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Search { query } => write!(f, "search({})", query),
            Action::Read { source } => write!(f, "read({})", source),
            Action::Reason { focus } => write!(f, "reason({})", focus),
            Action::Answer => write!(f, "answer"),
            Action::GiveUp => write!(f, "give_up"),
        }
    }
}

//
// ================= Loop phases =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initializing,
    Planning,
    Executing,
    Evaluating,
    Synthesizing,
    Done,
}

/// Why the loop stopped planning
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Remaining budget fell into the answer reserve
    BudgetReserve,
    MaxSteps,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::BudgetReserve => "budget reserve reached",
            StopReason::MaxSteps => "step limit reached",
            StopReason::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Collaborator I/O =================
//

/// A single news item returned by the search tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub content: String,
    pub source: String,
}

impl Article {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            source: source.into(),
        }
    }

    /// Text stored as the fact body
    pub fn fact_content(&self) -> String {
        if self.content.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.content)
        }
    }

    /// Provenance string stored alongside the fact
    pub fn fact_source(&self) -> String {
        format!("{} - {}", self.source, self.title)
    }
}

//
// ================= Memory snapshot =================
//

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemorySummary {
    pub facts: usize,
    pub pending_questions: usize,
    pub answered_questions: usize,
    pub search_queries: usize,
    pub visited_sources: usize,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub run_id: Uuid,
    pub query: String,
    pub answer: String,
    pub steps: u32,
    pub tokens_spent: u64,
    pub final_phase: Phase,
    pub stop_reason: StopReason,
    /// True when synthesis failed and the answer was assembled from raw facts
    pub used_fallback: bool,
    pub memory: MemorySummary,
    pub reasoning_trace: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialization() {
        let action = Action::Search {
            query: "TSLA deliveries".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "search");
        assert_eq!(json["query"], "TSLA deliveries");

        let answer = serde_json::to_value(Action::Answer).unwrap();
        assert_eq!(answer["action"], "answer");
    }

    #[test]
    fn test_terminal_actions() {
        assert!(Action::Answer.is_terminal());
        assert!(Action::GiveUp.is_terminal());
        assert!(!Action::Reason {
            focus: "q".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn test_article_fact_rendering() {
        let article = Article::new("Tesla beats", "Record Q3 deliveries", "Yahoo Finance News");
        assert_eq!(article.fact_content(), "Tesla beats: Record Q3 deliveries");
        assert_eq!(article.fact_source(), "Yahoo Finance News - Tesla beats");

        let bare = Article::new("Headline only", "  ", "Yahoo Finance News");
        assert_eq!(bare.fact_content(), "Headline only");
    }
}
