//! Prediction log data models.
//!
//! A `PredictionRecord` is written once per inference call and never updated.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NegaBotError;

pub const MIN_TEXT_CHARS: usize = 1;
pub const MAX_TEXT_CHARS: usize = 1000;

/// Caller-supplied attachment, stored as JSON text and never interpreted.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
        }
    }

    /// Class index used by the model head: 0 = Positive, 1 = Negative.
    pub fn class_index(&self) -> u8 {
        match self {
            Sentiment::Positive => 0,
            Sentiment::Negative => 1,
        }
    }

    pub fn from_class_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Sentiment::Positive),
            1 => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = NegaBotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Positive" | "positive" => Ok(Sentiment::Positive),
            "Negative" | "negative" => Ok(Sentiment::Negative),
            other => Err(NegaBotError::Validation(format!(
                "sentiment must be Positive or Negative, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionRecord {
    pub id: i64,
    pub text: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub predicted_class: u8,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

/// Input for `Database::append_prediction`. The store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub text: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    /// Inferred from `sentiment` when absent.
    pub predicted_class: Option<u8>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Metadata>,
}

impl NewPrediction {
    pub fn new(text: impl Into<String>, sentiment: Sentiment, confidence: f64) -> Self {
        Self {
            text: text.into(),
            sentiment,
            confidence,
            predicted_class: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Checks the record invariants and returns the class index to persist.
    pub fn validate(&self) -> Result<u8, NegaBotError> {
        validate_text(&self.text)?;

        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(NegaBotError::Validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }

        let expected = self.sentiment.class_index();
        match self.predicted_class {
            None => Ok(expected),
            Some(class) if class == expected => Ok(class),
            Some(class) => match Sentiment::from_class_index(class) {
                Some(other) => Err(NegaBotError::Validation(format!(
                    "predicted_class {class} ({other}) does not match sentiment {}",
                    self.sentiment
                ))),
                None => Err(NegaBotError::Validation(format!(
                    "predicted_class must be 0 or 1, got {class}"
                ))),
            },
        }
    }
}

pub fn validate_text(text: &str) -> Result<(), NegaBotError> {
    let chars = text.chars().count();
    if chars < MIN_TEXT_CHARS || chars > MAX_TEXT_CHARS {
        return Err(NegaBotError::Validation(format!(
            "text must be between {MIN_TEXT_CHARS} and {MAX_TEXT_CHARS} characters, got {chars}"
        )));
    }
    Ok(())
}

/// Row filter shared by the read-side queries. Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct PredictionFilter {
    pub sentiment: Option<Sentiment>,
    /// Case-insensitive substring match on `text`.
    pub search: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
}

impl PredictionFilter {
    pub fn sentiment(sentiment: Sentiment) -> Self {
        Self {
            sentiment: Some(sentiment),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sentiment.is_none()
            && self.search.is_none()
            && self.since.is_none()
            && self.until.is_none()
    }
}
