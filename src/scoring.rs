//! Confidence and sentiment heuristics applied to provider results.

use crate::sources::{SourceKind, SourceResult};
use serde::{Deserialize, Serialize};

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "positive", "bullish", "up", "growth",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "negative", "bearish", "down", "decline", "loss",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub sentiment: SentimentLabel,
    pub score: f64,
    pub confidence: f64,
}

/// Keyword sentiment: counts substring hits of a fixed positive and negative
/// vocabulary. Scores sit in [0.2, 0.8] with 0.5 as neutral.
pub fn analyze_sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let positive = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count() as i64;
    let negative = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count() as i64;
    let diff = positive - negative;

    let (sentiment, score) = match diff {
        d if d > 0 => (SentimentLabel::Positive, (0.5 + d as f64 * 0.1).min(0.8)),
        d if d < 0 => (SentimentLabel::Negative, (0.5 + d as f64 * 0.1).max(0.2)),
        _ => (SentimentLabel::Neutral, 0.5),
    };

    Sentiment {
        sentiment,
        score,
        confidence: (0.6 + diff.abs() as f64 * 0.1).min(0.9),
    }
}

pub fn base_confidence(kind: SourceKind) -> f64 {
    match kind {
        SourceKind::News => 0.8,
        SourceKind::Social => 0.6,
        SourceKind::Finance => 0.9,
        SourceKind::Weather => 0.95,
        SourceKind::Documents => 0.7,
    }
}

/// Confidence for a result. Documents keep the confidence they were indexed with.
pub fn confidence_for(result: &SourceResult) -> f64 {
    if result.source == SourceKind::Documents
        && let Some(stored) = result.confidence
    {
        return stored.clamp(0.1, 1.0);
    }

    let mut confidence = base_confidence(result.source);
    match result.source {
        SourceKind::Social => {
            let score = result.metric("score").unwrap_or(0.0);
            let comments = result.metric("comments").unwrap_or(0.0);
            if score > 100.0 || comments > 50.0 {
                confidence += 0.1;
            } else if score < 10.0 {
                confidence -= 0.1;
            }
        }
        SourceKind::News => {
            if result.published_at.is_some() {
                confidence += 0.05;
            }
        }
        _ => {}
    }
    confidence.clamp(0.1, 1.0)
}
