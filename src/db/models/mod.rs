pub mod analytics;
pub mod prediction;

pub use analytics::{
    round_to_places, ConfidenceBin, ConfidenceSummary, HourOfDayCounts, PredictionStats,
    SentimentCounts, TimeBucket,
};
pub use prediction::{
    validate_text, Metadata, NewPrediction, PredictionFilter, PredictionRecord, Sentiment,
    MAX_TEXT_CHARS, MIN_TEXT_CHARS,
};
