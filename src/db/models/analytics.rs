//! Aggregate read models returned by the prediction store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sentiment;

/// Per-label counts. Both labels are always present, zero when unseen.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentimentCounts {
    pub positive: u64,
    pub negative: u64,
}

impl SentimentCounts {
    pub fn total(&self) -> u64 {
        self.positive + self.negative
    }

    pub fn increment(&mut self, sentiment: Sentiment, by: u64) {
        match sentiment {
            Sentiment::Positive => self.positive += by,
            Sentiment::Negative => self.negative += by,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBucket {
    pub bucket_start: DateTime<Utc>,
    pub counts: SentimentCounts,
}

/// One slice of the confidence range, `[lower, upper)` except the last bin,
/// which also holds `upper`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceBin {
    pub lower: f64,
    pub upper: f64,
    pub counts: SentimentCounts,
}

/// Counts for one UTC hour of the day, aggregated across all dates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourOfDayCounts {
    pub hour: u8,
    pub counts: SentimentCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceSummary {
    pub sentiment: Sentiment,
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionStats {
    pub total_predictions: u64,
    pub positive_count: u64,
    pub negative_count: u64,
    pub positive_percentage: f64,
    pub negative_percentage: f64,
    pub average_confidence: f64,
}

impl PredictionStats {
    pub fn from_parts(counts: SentimentCounts, average_confidence: f64) -> Self {
        let total = counts.total();
        let percentage = |part: u64| {
            if total == 0 {
                0.0
            } else {
                round_to_places(part as f64 / total as f64 * 100.0, 2)
            }
        };

        Self {
            total_predictions: total,
            positive_count: counts.positive,
            negative_count: counts.negative,
            positive_percentage: percentage(counts.positive),
            negative_percentage: percentage(counts.negative),
            average_confidence: round_to_places(average_confidence, 4),
        }
    }
}

pub fn round_to_places(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
