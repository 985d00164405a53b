//! Confidence scorer: mean of four independently bucketed factors.

use serde::{Deserialize, Serialize};

/// Raw signals feeding the confidence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfidenceSignals {
    /// Body length in characters.
    pub content_chars: usize,
    /// Number of named entities found.
    pub entity_count: usize,
    /// Highest per-category hit count (reduced dictionary).
    pub top_category_hits: usize,
    /// Whether any DATE/TIME entity is present.
    pub has_temporal_entity: bool,
}

/// The four bucketed factor scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub content_length: f64,
    pub entity_count: f64,
    pub category_strength: f64,
    pub date_presence: f64,
}

impl ConfidenceFactors {
    pub fn from_signals(signals: &ConfidenceSignals) -> Self {
        Self {
            content_length: bucket(signals.content_chars, [500, 200, 100]),
            entity_count: bucket(signals.entity_count, [5, 3, 1]),
            category_strength: bucket(signals.top_category_hits, [3, 2, 1]),
            date_presence: if signals.has_temporal_entity { 1.0 } else { 0.5 },
        }
    }

    /// Arithmetic mean of the four factors, without rounding or clamping.
    pub fn mean(&self) -> f64 {
        (self.content_length + self.entity_count + self.category_strength + self.date_presence)
            / 4.0
    }
}

/// Score signals into a confidence value in [0.425, 1.0].
pub fn score(signals: &ConfidenceSignals) -> f64 {
    ConfidenceFactors::from_signals(signals).mean()
}

/// Map `value` to 1.0 / 0.8 / 0.6 / 0.4 by strictly-greater-than thresholds.
fn bucket(value: usize, [high, mid, low]: [usize; 3]) -> f64 {
    if value > high {
        1.0
    } else if value > mid {
        0.8
    } else if value > low {
        0.6
    } else {
        0.4
    }
}
