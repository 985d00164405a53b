//! Classification engine.
//!
//! A pure function of `(RawMessage, NormalizedDocument)` plus an injected
//! "now". Holds no mutable state; one instance can be shared across tasks.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::confidence::{self, ConfidenceSignals};
use super::dates;
use super::types::{
    CandidateTask, Category, ClassificationResult, NormalizedDocument, Priority, RawMessage,
    TaskStatus,
};
use super::vocabulary::{
    ACTION_PHRASES, CATEGORY_TERMS, CONFIDENCE_CATEGORY_TERMS, ENTITY_LABELS, TOPIC_TERMS,
    URGENCY_TERMS, any_match, count_matches,
};

/// A resolved date must fall inside `(now, now + 72h)` to count as near.
const NEAR_DATE_WINDOW_HOURS: i64 = 72;

/// Due date for a task whose sentence carries no resolvable date.
const DEFAULT_TASK_DUE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassificationEngine;

impl ClassificationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &RawMessage, doc: &NormalizedDocument) -> ClassificationResult {
        self.classify_at(message, doc, Utc::now())
    }

    /// Classify with an explicit clock so results are reproducible.
    pub fn classify_at(
        &self,
        message: &RawMessage,
        doc: &NormalizedDocument,
        now: DateTime<Utc>,
    ) -> ClassificationResult {
        let lowered = message.lowered_text();

        let urgency = urgency_score(&lowered);
        let near_date = has_near_date(doc, now);
        let priority = decide_priority(urgency, near_date);
        let category = select_category(&lowered);
        let labels = derive_labels(message, doc);

        let confidence = confidence::score(&ConfidenceSignals {
            content_chars: message.body.chars().count(),
            entity_count: doc.entities().len(),
            top_category_hits: strongest_category_hits(&lowered),
            has_temporal_entity: doc.temporal_entities().next().is_some(),
        });

        let tasks = extract_tasks(doc, now);

        debug!(
            uid = message.uid,
            urgency,
            near_date,
            priority = %priority,
            category = %category,
            confidence,
            tasks = tasks.len(),
            "Classified message"
        );

        ClassificationResult {
            priority,
            category,
            labels,
            confidence,
            tasks,
        }
    }
}

/// Number of distinct urgency terms present in the lower-cased text.
pub fn urgency_score(lowered: &str) -> usize {
    count_matches(lowered, URGENCY_TERMS)
}

/// Whether any DATE/TIME entity resolves strictly between `now` and `now + 72h`.
pub fn has_near_date(doc: &NormalizedDocument, now: DateTime<Utc>) -> bool {
    let horizon = now + Duration::hours(NEAR_DATE_WINDOW_HOURS);
    doc.temporal_entities()
        .filter_map(|entity| dates::parse_at(&entity.text, now).ok())
        .any(|date| date > now && date < horizon)
}

pub fn decide_priority(urgency: usize, near_date: bool) -> Priority {
    if urgency >= 2 || near_date {
        Priority::High
    } else if urgency == 1 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Highest-scoring category; the first in dictionary order wins a tie.
pub fn select_category(lowered: &str) -> Category {
    let mut best = Category::Other;
    let mut best_score = 0;
    for (category, terms) in CATEGORY_TERMS {
        let score = count_matches(lowered, terms);
        if score > best_score {
            best = *category;
            best_score = score;
        }
    }
    best
}

fn strongest_category_hits(lowered: &str) -> usize {
    CONFIDENCE_CATEGORY_TERMS
        .iter()
        .map(|(_, terms)| count_matches(lowered, terms))
        .max()
        .unwrap_or(0)
}

/// Entity-type labels plus topic labels (body only), deduplicated and sorted.
pub fn derive_labels(message: &RawMessage, doc: &NormalizedDocument) -> Vec<String> {
    let body = message.body.to_lowercase();

    let from_entities = ENTITY_LABELS
        .iter()
        .filter(|(tag, _)| doc.entities().iter().any(|e| e.tag == *tag))
        .map(|(_, label)| *label);
    let from_topics = TOPIC_TERMS
        .iter()
        .filter(|(_, terms)| any_match(&body, terms))
        .map(|(label, _)| *label);

    let mut labels: Vec<String> = from_entities.chain(from_topics).map(String::from).collect();
    labels.sort();
    labels.dedup();
    labels
}

/// One pending task per sentence containing an action phrase, in sentence order.
pub fn extract_tasks(doc: &NormalizedDocument, now: DateTime<Utc>) -> Vec<CandidateTask> {
    doc.sentences()
        .iter()
        .filter(|sentence| any_match(&sentence.text.to_lowercase(), ACTION_PHRASES))
        .map(|sentence| {
            let due_date = doc
                .temporal_entities()
                .filter(|entity| sentence.contains(entity))
                .find_map(|entity| dates::parse_at(&entity.text, now).ok())
                .unwrap_or_else(|| now + Duration::hours(DEFAULT_TASK_DUE_HOURS));

            CandidateTask {
                description: sentence.text.clone(),
                due_date,
                priority: Priority::Medium,
                status: TaskStatus::Pending,
                created_at: now,
                updated_at: now,
            }
        })
        .collect()
}
