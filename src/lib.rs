//! Stock Research Loop
//!
//! An iterative research agent for financial questions that:
//! - Searches finance news and accumulates deduplicated facts
//! - Ranks facts by semantic relevance to the question
//! - Chooses each next step with a deterministic planning policy
//! - Always terminates within its step and token budget
//! - Falls back to a raw-facts answer when synthesis fails
//!
//! LOOP:
//! INITIALIZE → PLAN → EXECUTE → EVALUATE → (PLAN …) → SYNTHESIZE → DONE

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod planner;
pub mod similarity;
pub mod state;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CollaboratorError, EmbeddingError, ResearchError, Result};

// Re-export common types
pub use agent::{ResearchOptions, Researcher, StepOutcome};
pub use config::ResearchConfig;
pub use models::*;
