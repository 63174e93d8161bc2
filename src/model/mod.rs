//! Sentiment model seam.
//!
//! Inference is owned by a pre-trained classifier hosted on a model hub. The
//! rest of the crate only sees the `SentimentModel` trait and the `Predictor`
//! wrapper that validates input and normalizes the model's scores.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod hub;
mod predictor;
#[cfg(test)]
pub(crate) mod scripted;

pub use hub::HubModel;
pub use predictor::{Prediction, Predictor, MAX_MODEL_TOKENS};

pub const DEFAULT_MODEL_NAME: &str = "jatinmehra/NegaBot-Product-Criticism-Catcher";

/// Raw per-class scores as reported by a model, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub positive: f64,
    pub negative: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Probabilities {
    pub positive: f64,
    pub negative: f64,
}

#[async_trait]
pub trait SentimentModel: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<ClassScores>;
}
