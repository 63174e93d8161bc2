use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::models::{round_to_places, validate_text, Sentiment};
use crate::error::NegaBotError;

use super::{ClassScores, Probabilities, SentimentModel};

/// Token window of the hosted classifier.
pub const MAX_MODEL_TOKENS: usize = 512;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub text: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub predicted_class: u8,
    pub probabilities: Probabilities,
}

/// Shared, read-only handle to the loaded model.
#[derive(Clone)]
pub struct Predictor {
    model: Arc<dyn SentimentModel>,
}

impl Predictor {
    pub fn new(model: Arc<dyn SentimentModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub async fn predict(&self, text: &str) -> Result<Prediction, NegaBotError> {
        validate_text(text)?;

        let input = truncate_to_tokens(text, MAX_MODEL_TOKENS);
        if input.len() < text.len() {
            log_debug!(
                "input truncated to {MAX_MODEL_TOKENS} tokens ({} of {} bytes)",
                input.len(),
                text.len()
            );
        }

        let scores = self
            .model
            .classify(input)
            .await
            .map_err(|err| NegaBotError::Model(format!("{err:#}")))?;

        build_prediction(text, scores)
    }

    /// Runs every text in order; one failure never aborts the rest.
    pub async fn batch_predict(&self, texts: &[String]) -> Vec<Result<Prediction, NegaBotError>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.predict(text).await);
        }
        results
    }
}

fn build_prediction(text: &str, scores: ClassScores) -> Result<Prediction, NegaBotError> {
    let probabilities = normalize(scores)?;

    // Ties resolve to Positive, matching argmax over [positive, negative].
    let sentiment = if probabilities.negative > probabilities.positive {
        Sentiment::Negative
    } else {
        Sentiment::Positive
    };
    let confidence = match sentiment {
        Sentiment::Positive => probabilities.positive,
        Sentiment::Negative => probabilities.negative,
    };

    Ok(Prediction {
        text: text.to_string(),
        sentiment,
        confidence: round_to_places(confidence, 4),
        predicted_class: sentiment.class_index(),
        probabilities: Probabilities {
            positive: round_to_places(probabilities.positive, 4),
            negative: round_to_places(probabilities.negative, 4),
        },
    })
}

fn normalize(scores: ClassScores) -> Result<Probabilities, NegaBotError> {
    for (label, score) in [("positive", scores.positive), ("negative", scores.negative)] {
        if !score.is_finite() || score < 0.0 {
            return Err(NegaBotError::Model(format!(
                "model returned invalid {label} score {score}"
            )));
        }
    }

    let total = scores.positive + scores.negative;
    if total == 0.0 {
        return Ok(Probabilities {
            positive: 0.5,
            negative: 0.5,
        });
    }

    Ok(Probabilities {
        positive: scores.positive / total,
        negative: scores.negative / total,
    })
}

/// Keeps a prefix of `text` holding at most `max_tokens` pieces.
///
/// Approximates subword tokenization: an alphanumeric run is one piece and
/// every other non-whitespace character is a piece of its own.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let mut seen = 0;
    let mut in_word = false;
    for (offset, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
            continue;
        }

        let starts_piece = !(in_word && c.is_alphanumeric());
        in_word = c.is_alphanumeric();
        if starts_piece {
            if seen == max_tokens {
                return text[..offset].trim_end();
            }
            seen += 1;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::scripted::ScriptedModel;

    fn with_model(model: ScriptedModel) -> Predictor {
        Predictor::new(Arc::new(model))
    }

    #[tokio::test]
    async fn predict_normalizes_scores() {
        let predictor = with_model(ScriptedModel::fixed(0.2, 0.6));
        let prediction = predictor.predict("Broke after one day").await.unwrap();

        assert_eq!(prediction.sentiment, Sentiment::Negative);
        assert_eq!(prediction.predicted_class, 1);
        assert_eq!(prediction.confidence, 0.75);
        assert_eq!(prediction.probabilities.positive, 0.25);
        assert_eq!(prediction.probabilities.negative, 0.75);
        assert_eq!(prediction.text, "Broke after one day");
    }

    #[tokio::test]
    async fn valid_inputs_yield_well_formed_predictions() {
        let predictor = with_model(ScriptedModel::keywords());
        let long = "ok ".repeat(333);
        let inputs: [&str; 4] = [
            "This product is absolutely amazing! Best purchase ever!",
            "Terrible quality, broke after one day. Complete waste of money.",
            "x",
            long.as_str(),
        ];

        for text in inputs {
            let prediction = predictor.predict(text).await.unwrap();
            assert!((0.0..=1.0).contains(&prediction.confidence));
            let sum = prediction.probabilities.positive + prediction.probabilities.negative;
            assert!((sum - 1.0).abs() < 1e-3, "sum was {sum}");
            assert_eq!(
                Sentiment::from_class_index(prediction.predicted_class),
                Some(prediction.sentiment)
            );
        }
    }

    #[tokio::test]
    async fn rejects_bad_length_before_calling_model() {
        let model = Arc::new(ScriptedModel::fixed(0.5, 0.5));
        let predictor = Predictor::new(model.clone());

        assert!(matches!(
            predictor.predict("").await,
            Err(NegaBotError::Validation(_))
        ));
        assert!(matches!(
            predictor.predict(&"a".repeat(1001)).await,
            Err(NegaBotError::Validation(_))
        ));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn model_failures_become_model_errors() {
        let predictor = with_model(ScriptedModel::failing("hub unreachable"));
        let err = predictor.predict("hello").await.unwrap_err();
        assert!(matches!(err, NegaBotError::Model(ref msg) if msg.contains("hub unreachable")));
    }

    #[tokio::test]
    async fn rejects_nonsense_scores() {
        let predictor = with_model(ScriptedModel::fixed(f64::NAN, 0.5));
        assert!(matches!(
            predictor.predict("hello").await,
            Err(NegaBotError::Model(_))
        ));

        let predictor = with_model(ScriptedModel::fixed(-1.0, 0.5));
        assert!(predictor.predict("hello").await.is_err());
    }

    #[tokio::test]
    async fn zero_scores_split_evenly_and_tie_goes_positive() {
        let prediction = with_model(ScriptedModel::fixed(0.0, 0.0))
            .predict("hm")
            .await
            .unwrap();
        assert_eq!(prediction.sentiment, Sentiment::Positive);
        assert_eq!(prediction.confidence, 0.5);
    }

    #[tokio::test]
    async fn batch_keeps_order_and_isolates_failures() {
        let predictor = with_model(ScriptedModel::keywords());
        let texts = vec!["Great!".to_string(), String::new(), "Awful".to_string()];

        let results = predictor.batch_predict(&texts).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().sentiment, Sentiment::Positive);
        assert!(matches!(results[1], Err(NegaBotError::Validation(_))));
        assert_eq!(results[2].as_ref().unwrap().sentiment, Sentiment::Negative);
    }

    #[test]
    fn truncation_keeps_a_prefix_of_whole_pieces() {
        assert_eq!(truncate_to_tokens("one two three", 2), "one two");
        assert_eq!(truncate_to_tokens("  one   two  ", 5), "  one   two  ");
        assert_eq!(truncate_to_tokens("one\ttwo\nthree four", 3), "one\ttwo\nthree");
        assert_eq!(truncate_to_tokens("hi!! there", 2), "hi!");

        let long = "word ".repeat(600);
        let cut = truncate_to_tokens(&long, MAX_MODEL_TOKENS);
        assert_eq!(cut.split_whitespace().count(), MAX_MODEL_TOKENS);
    }

    #[tokio::test]
    async fn model_sees_truncated_input() {
        let model = Arc::new(ScriptedModel::fixed(0.9, 0.1));
        let predictor = Predictor::new(model.clone());
        let text = "?".repeat(MAX_MODEL_TOKENS + 88);

        let prediction = predictor.predict(&text).await.unwrap();
        assert_eq!(prediction.text, text);
        assert_eq!(
            model.last_input().unwrap().chars().count(),
            MAX_MODEL_TOKENS
        );
    }
}
