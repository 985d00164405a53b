//! Shared types for the triage pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Raw message ─────────────────────────────────────────────────────

/// A message as fetched from the mailbox, reduced to plain text.
///
/// Immutable once built; owned by the ingestion loop for one processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Transport UID within the selected folder.
    pub uid: u32,
    /// Stable transport identifier (`folder:uidvalidity:uid`), the de-duplication key.
    pub external_id: String,
    /// Message-ID header, if present.
    pub message_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    /// First `text/plain` part, empty when the message has none.
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Subject and body joined by the single separator fed to the normalizer.
    pub fn analysis_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }

    /// Lower-cased subject + body used for vocabulary matching.
    pub fn lowered_text(&self) -> String {
        format!("{} {}", self.subject, self.body).to_lowercase()
    }
}

// ── Normalized document ─────────────────────────────────────────────

/// Named-entity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityTag {
    Person,
    Organization,
    Location,
    Product,
    Date,
    Time,
}

impl EntityTag {
    /// DATE and TIME entities are the ones handed to the date parser.
    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::Time)
    }
}

/// A tagged span of the normalized text. Offsets are byte offsets into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub tag: EntityTag,
    pub start: usize,
    pub end: usize,
}

/// A sentence span of the normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Sentence {
    /// Whether `entity` lies entirely inside this sentence.
    pub fn contains(&self, entity: &Entity) -> bool {
        entity.start >= self.start && entity.end <= self.end
    }
}

/// Read-only analysis of a message's text. Lives for one classification call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedDocument {
    text: String,
    sentences: Vec<Sentence>,
    entities: Vec<Entity>,
}

impl NormalizedDocument {
    /// Build a document. Entities are kept in document order.
    pub fn new(text: String, sentences: Vec<Sentence>, mut entities: Vec<Entity>) -> Self {
        entities.sort_by_key(|e| (e.start, e.end));
        Self {
            text,
            sentences,
            entities,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// DATE/TIME entities in document order.
    pub fn temporal_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.tag.is_temporal())
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Message / task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Closed set of message categories. Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Financial,
    Support,
    Sales,
    Hr,
    It,
    Other,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Support => "support",
            Self::Sales => "sales",
            Self::Hr => "hr",
            Self::It => "it",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "financial" => Ok(Self::Financial),
            "support" => Ok(Self::Support),
            "sales" => Ok(Self::Sales),
            "hr" => Ok(Self::Hr),
            "it" => Ok(Self::It),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Lifecycle of a candidate task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Action item suggested from a sentence of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTask {
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Output of the classification engine for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub priority: Priority,
    pub category: Category,
    /// Deduplicated, sorted lexically.
    pub labels: Vec<String>,
    /// Mean of four bucketed factors, within [0.425, 1.0].
    pub confidence: f64,
    /// In sentence order.
    pub tasks: Vec<CandidateTask>,
}

/// A message merged with its classification, handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEmail {
    pub external_id: String,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub priority: Priority,
    pub category: Category,
    pub labels: Vec<String>,
    pub confidence: f64,
    pub tasks: Vec<CandidateTask>,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl ClassifiedEmail {
    /// Merge classification fields into the message record.
    pub fn merge(
        message: RawMessage,
        result: ClassificationResult,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: message.external_id,
            message_id: message.message_id,
            subject: message.subject,
            from: message.from,
            to: message.to,
            content: message.body,
            priority: result.priority,
            category: result.category,
            labels: result.labels,
            confidence: result.confidence,
            tasks: result.tasks,
            received_at: message.received_at,
            processed_at,
        }
    }
}
