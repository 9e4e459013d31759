//! Research memory
//!
//! Facts, open and answered questions, past search queries and visited
//! sources for a single research call, deduplicated through the
//! similarity engine.

pub mod item;
pub mod store;

pub use item::{fingerprint, MemoryItem, Question, QuestionState, REASONING_SOURCE};
pub use store::MemoryStore;
