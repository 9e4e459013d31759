//! Action planner
//!
//! A pure decision function over [`ResearchState`]. Rules are applied top
//! to bottom and the first match wins; the first two are absolute ceilings
//! that guarantee the loop terminates.

use crate::config::PlannerConfig;
use crate::models::{Action, StopReason};
use crate::state::ResearchState;
use tracing::debug;

/// Which policy rule produced an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Remaining budget is inside the answer reserve
    BudgetReserve,
    MaxSteps,
    /// Oldest pending question drives the next search
    PendingQuestion,
    /// Too few facts and the original query not searched yet
    Bootstrap,
    Consolidate,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::BudgetReserve => "budget_reserve",
            Rule::MaxSteps => "max_steps",
            Rule::PendingQuestion => "pending_question",
            Rule::Bootstrap => "bootstrap",
            Rule::Consolidate => "consolidate",
        }
    }

    /// Stop reason for the rules that end the loop
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Rule::BudgetReserve => Some(StopReason::BudgetReserve),
            Rule::MaxSteps => Some(StopReason::MaxSteps),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub rule: Rule,
}

#[derive(Debug, Clone, Default)]
pub struct ActionPlanner {
    config: PlannerConfig,
}

impl ActionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(&self, state: &ResearchState) -> Action {
        self.decide(state).action
    }

    /// Next action together with the rule that chose it
    pub fn decide(&self, state: &ResearchState) -> Decision {
        let memory = state.memory();

        let decision = if state.tokens_remaining() <= self.config.answer_reserve_tokens {
            Decision {
                action: Action::Answer,
                rule: Rule::BudgetReserve,
            }
        } else if state.step() >= self.config.max_steps {
            Decision {
                action: Action::Answer,
                rule: Rule::MaxSteps,
            }
        } else if let Some(question) = memory.next_pending_question() {
            Decision {
                action: Action::Search {
                    query: question.to_string(),
                },
                rule: Rule::PendingQuestion,
            }
        } else if memory.fact_count() < self.config.min_facts
            && !memory.has_searched(state.query())
        {
            Decision {
                action: Action::Search {
                    query: state.query().to_string(),
                },
                rule: Rule::Bootstrap,
            }
        } else {
            Decision {
                action: Action::Reason {
                    focus: state.query().to_string(),
                },
                rule: Rule::Consolidate,
            }
        };

        debug!(
            step = state.step(),
            tokens_remaining = state.tokens_remaining(),
            facts = memory.fact_count(),
            rule = decision.rule.as_str(),
            action = %decision.action,
            "Planner decision"
        );

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::memory::MemoryStore;
    use crate::similarity::SimilarityEngine;
    use crate::testing::ScriptedEmbedder;
    use serde_json::Map;
    use std::sync::Arc;

    fn planner() -> ActionPlanner {
        ActionPlanner::new(PlannerConfig {
            max_steps: 5,
            answer_reserve_tokens: 100,
            min_facts: 2,
        })
    }

    fn state(budget: u64) -> ResearchState {
        let engine = SimilarityEngine::new(Arc::new(ScriptedEmbedder::new()));
        ResearchState::new(
            "How exposed is NVDA to China export rules?",
            budget,
            MemoryStore::new(MemoryConfig::default(), engine),
        )
    }

    async fn add_facts(state: &mut ResearchState, n: usize) {
        for i in 0..n {
            state
                .memory_mut()
                .add_fact(format!("fact {}", i), "test", Map::new())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_budget_reserve_beats_pending_questions() {
        let mut s = state(1000);
        s.memory_mut().add_question("What share of revenue is China?").await.unwrap();
        s.record_step(900);

        let decision = planner().decide(&s);
        assert_eq!(decision.action, Action::Answer);
        assert_eq!(decision.rule, Rule::BudgetReserve);
        assert_eq!(decision.rule.stop_reason(), Some(StopReason::BudgetReserve));
    }

    #[tokio::test]
    async fn test_reserve_boundary_is_inclusive() {
        let mut s = state(1000);
        s.record_step(899);
        assert_ne!(planner().plan(&s), Action::Answer);

        s.record_step(1);
        assert_eq!(planner().plan(&s), Action::Answer);
    }

    #[tokio::test]
    async fn test_max_steps_forces_answer() {
        let mut s = state(100_000);
        s.memory_mut().add_question("Pending gap").await.unwrap();
        for _ in 0..5 {
            s.record_step(1);
        }

        let decision = planner().decide(&s);
        assert_eq!(decision.action, Action::Answer);
        assert_eq!(decision.rule, Rule::MaxSteps);
    }

    #[tokio::test]
    async fn test_pending_questions_fifo() {
        let mut s = state(100_000);
        s.memory_mut().add_question("first gap").await.unwrap();
        s.memory_mut().add_question("second gap").await.unwrap();

        assert_eq!(
            planner().plan(&s),
            Action::Search {
                query: "first gap".to_string()
            }
        );

        s.memory_mut().mark_question_answered("first gap");
        assert_eq!(
            planner().plan(&s),
            Action::Search {
                query: "second gap".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_bootstrap_search_then_reason() {
        let mut s = state(100_000);
        add_facts(&mut s, 1).await;

        let decision = planner().decide(&s);
        assert_eq!(decision.rule, Rule::Bootstrap);
        assert_eq!(
            decision.action,
            Action::Search {
                query: "How exposed is NVDA to China export rules?".to_string()
            }
        );

        add_facts(&mut s, 2).await;
        let decision = planner().decide(&s);
        assert_eq!(decision.rule, Rule::Consolidate);
        assert!(matches!(decision.action, Action::Reason { .. }));
        assert_eq!(decision.rule.stop_reason(), None);
    }

    #[tokio::test]
    async fn test_searched_query_with_few_facts_reasons() {
        let mut s = state(100_000);
        add_facts(&mut s, 1).await;
        s.memory_mut()
            .add_search_query("How exposed is NVDA to China export rules?")
            .await
            .unwrap();

        let decision = planner().decide(&s);
        assert_eq!(decision.rule, Rule::Consolidate);
        assert_eq!(
            decision.action,
            Action::Reason {
                focus: "How exposed is NVDA to China export rules?".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_never_emits_read_or_give_up() {
        let mut s = state(2_000);
        let p = planner();
        for _ in 0..10 {
            let action = p.plan(&s);
            assert!(!matches!(action, Action::Read { .. } | Action::GiveUp));
            s.record_step(50);
        }
    }
}
