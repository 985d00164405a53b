//! Deterministic, rule-based triage of a single message.
//!
//! 1. `TextAnalyzer::normalize()`: stopwords, sentences, entities
//! 2. `ClassificationEngine::classify()`: priority, category, labels, confidence, tasks
//!
//! No learned model. Vocabularies are fixed, explicitly ordered tables.

pub mod classifier;
pub mod confidence;
pub mod dates;
pub mod normalizer;
pub mod types;
pub mod vocabulary;

pub use classifier::ClassificationEngine;
pub use normalizer::{Language, RuleAnalyzer, TextAnalyzer};
pub use types::*;
