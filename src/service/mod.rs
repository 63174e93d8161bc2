//! Request orchestration: predict, log the result, answer.
//!
//! Logging to the store is best effort. A failed write is reported with
//! `logged: false` and never turns a successful prediction into an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Database, Metadata, NewPrediction, PredictionFilter, PredictionStats};
use crate::error::NegaBotError;
use crate::model::{Prediction, Predictor};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

pub const SERVICE_NAME: &str = "NegaBot API";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    pub tweets: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub logged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    pub index: usize,
    #[serde(flatten)]
    pub prediction: Prediction,
    /// Same instant stored with the logged record.
    pub timestamp: DateTime<Utc>,
    pub logged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItemError {
    pub index: usize,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchPredictResponse {
    pub results: Vec<BatchResult>,
    pub errors: Vec<BatchItemError>,
    pub total_processed: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: PredictionStats,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: &'static str,
    pub description: &'static str,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Service health check"),
    ("POST", "/predict", "Single tweet prediction"),
    ("POST", "/batch_predict", "Multiple tweets prediction"),
    ("GET", "/stats", "Prediction statistics"),
    ("GET", "/predictions", "Recent logged predictions"),
    ("GET", "/stats/timeseries", "Prediction counts per time bucket"),
    ("GET", "/export", "Download the prediction log as CSV or JSON"),
    ("GET", "/dashboard", "Analytics dashboard"),
];

/// Shared by every request task; cheap to clone.
#[derive(Clone)]
pub struct PredictionService {
    predictor: Option<Predictor>,
    db: Database,
    model_name: String,
    max_batch_size: usize,
}

impl PredictionService {
    /// `predictor` is `None` when the model failed to load; predict calls
    /// then answer `ModelUnavailable`.
    pub fn new(
        predictor: Option<Predictor>,
        db: Database,
        model_name: impl Into<String>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            predictor,
            db,
            model_name: model_name.into(),
            max_batch_size,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn model_loaded(&self) -> bool {
        self.predictor.is_some()
    }

    fn predictor(&self) -> Result<&Predictor, NegaBotError> {
        self.predictor.as_ref().ok_or(NegaBotError::ModelUnavailable)
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            message: format!("Welcome to {SERVICE_NAME}"),
            version: env!("CARGO_PKG_VERSION"),
            description: "Tweet sentiment classification using the NegaBot model",
            endpoints: ENDPOINTS
                .iter()
                .map(|&(method, path, description)| EndpointInfo {
                    method,
                    path,
                    description,
                })
                .collect(),
        }
    }

    pub fn health(&self) -> HealthResponse {
        let loaded = self.model_loaded();
        HealthResponse {
            status: if loaded { "healthy" } else { "unhealthy" }.into(),
            model_loaded: loaded,
            model_name: self.model_name.clone(),
            timestamp: Utc::now(),
        }
    }

    pub async fn predict(&self, request: PredictRequest) -> Result<PredictResponse, NegaBotError> {
        let predictor = self.predictor()?;
        let prediction = predictor.predict(&request.text).await?;
        let timestamp = Utc::now();
        let logged = self
            .log_prediction(&prediction, timestamp, request.metadata)
            .await;

        log_info!(
            "Prediction made: {} (confidence: {:.2}%)",
            prediction.sentiment,
            prediction.confidence * 100.0
        );

        Ok(PredictResponse {
            prediction,
            timestamp,
            request_id: Uuid::new_v4(),
            logged,
        })
    }

    /// Every item is attempted; per-item failures come back index-tagged.
    pub async fn batch_predict(
        &self,
        request: BatchPredictRequest,
    ) -> Result<BatchPredictResponse, NegaBotError> {
        if request.tweets.is_empty() {
            return Err(NegaBotError::Validation(
                "tweets must contain at least one entry".into(),
            ));
        }
        if request.tweets.len() > self.max_batch_size {
            return Err(NegaBotError::Validation(format!(
                "tweets may contain at most {} entries, got {}",
                self.max_batch_size,
                request.tweets.len()
            )));
        }

        let predictor = self.predictor()?;
        let outcomes = predictor.batch_predict(&request.tweets).await;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(prediction) => {
                    let timestamp = Utc::now();
                    let logged = self
                        .log_prediction(&prediction, timestamp, request.metadata.clone())
                        .await;
                    results.push(BatchResult {
                        index,
                        prediction,
                        timestamp,
                        logged,
                    });
                }
                Err(err) => errors.push(BatchItemError {
                    index,
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }),
            }
        }

        log_info!(
            "Batch prediction completed: {} of {} tweets processed",
            results.len(),
            request.tweets.len()
        );

        Ok(BatchPredictResponse {
            total_processed: results.len(),
            results,
            errors,
            timestamp: Utc::now(),
        })
    }

    pub async fn stats(&self, filter: &PredictionFilter) -> Result<StatsResponse, NegaBotError> {
        let stats = self.db.stats(filter).await?;
        let message = (stats.total_predictions == 0).then(|| {
            if filter.is_empty() {
                "No predictions found".to_string()
            } else {
                "No predictions match the filters".to_string()
            }
        });
        Ok(StatsResponse {
            stats,
            last_updated: Utc::now(),
            message,
        })
    }

    async fn log_prediction(
        &self,
        prediction: &Prediction,
        timestamp: DateTime<Utc>,
        metadata: Option<Metadata>,
    ) -> bool {
        let record = NewPrediction {
            text: prediction.text.clone(),
            sentiment: prediction.sentiment,
            confidence: prediction.confidence,
            predicted_class: Some(prediction.predicted_class),
            timestamp,
            metadata,
        };

        match self.db.append_prediction(record).await {
            Ok(_) => true,
            Err(err) => {
                log_error!("Failed to log prediction: {err}");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::test_support::{keyword_service, service_without_model};
    use super::*;
    use crate::db::Sentiment;

    fn batch(tweets: &[&str]) -> BatchPredictRequest {
        BatchPredictRequest {
            tweets: tweets.iter().map(|t| t.to_string()).collect(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn predict_logs_and_echoes_the_text() {
        let (service, _dir) = keyword_service();
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!("twitter"));

        let response = service
            .predict(PredictRequest {
                text: "Terrible quality, broke after one day.".into(),
                metadata: Some(metadata.clone()),
            })
            .await
            .unwrap();

        assert_eq!(response.prediction.sentiment, Sentiment::Negative);
        assert_eq!(response.prediction.predicted_class, 1);
        assert!(response.logged);

        let stored = service
            .db()
            .list_recent(1, &PredictionFilter::default())
            .await
            .unwrap();
        assert_eq!(stored[0].text, "Terrible quality, broke after one day.");
        assert_eq!(stored[0].confidence, response.prediction.confidence);
        assert_eq!(stored[0].metadata, Some(metadata));
    }

    #[tokio::test]
    async fn predict_response_is_flat_json() {
        let (service, _dir) = keyword_service();
        let response = service
            .predict(PredictRequest {
                text: "Love it".into(),
                metadata: None,
            })
            .await
            .unwrap();

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["sentiment"], json!("Positive"));
        assert_eq!(value["probabilities"]["positive"], json!(0.87));
        assert_eq!(value["logged"], json!(true));
        assert!(value["request_id"].is_string());
    }

    #[tokio::test]
    async fn storage_failure_still_answers_with_logged_false() {
        let (service, _dir) = keyword_service();
        service
            .db()
            .execute(|conn| {
                conn.execute("DROP TABLE predictions", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let response = service
            .predict(PredictRequest {
                text: "Still works".into(),
                metadata: None,
            })
            .await
            .unwrap();

        assert!(!response.logged);
        assert_eq!(response.prediction.sentiment, Sentiment::Positive);
    }

    #[tokio::test]
    async fn batch_reports_index_tagged_errors() {
        let (service, _dir) = keyword_service();
        let response = service.batch_predict(batch(&["Great!", ""])).await.unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].index, 0);
        assert_eq!(response.total_processed, 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].index, 1);
        assert_eq!(response.errors[0].kind, "validation_error");

        let logged = service.db().count(&PredictionFilter::default()).await.unwrap();
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn batch_results_carry_the_logged_timestamp() {
        let (service, _dir) = keyword_service();
        let response = service
            .batch_predict(batch(&["Great!", "Awful"]))
            .await
            .unwrap();

        let records = service
            .db()
            .list_all(&PredictionFilter::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        for (result, record) in response.results.iter().zip(&records) {
            assert_eq!(
                result.timestamp.timestamp_micros(),
                record.timestamp.timestamp_micros()
            );
        }

        let value = serde_json::to_value(&response).unwrap();
        assert!(value["results"][1]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let (service, _dir) = keyword_service();
        let response = service
            .batch_predict(batch(&["Awful", "Lovely", "Worst ever"]))
            .await
            .unwrap();

        let labels: Vec<_> = response
            .results
            .iter()
            .map(|r| (r.index, r.prediction.sentiment))
            .collect();
        assert_eq!(
            labels,
            vec![
                (0, Sentiment::Negative),
                (1, Sentiment::Positive),
                (2, Sentiment::Negative)
            ]
        );
    }

    #[tokio::test]
    async fn batch_size_is_bounded() {
        let (service, _dir) = keyword_service();
        let err = service.batch_predict(batch(&[])).await.unwrap_err();
        assert!(matches!(err, NegaBotError::Validation(_)));

        let too_many = vec!["ok"; 51];
        let err = service.batch_predict(batch(&too_many)).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[tokio::test]
    async fn missing_model_is_unavailable_and_unhealthy() {
        let (service, _dir) = service_without_model();

        let err = service
            .predict(PredictRequest {
                text: "hello".into(),
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NegaBotError::ModelUnavailable));

        let err = service.batch_predict(batch(&["hello"])).await.unwrap_err();
        assert_eq!(err.status_code(), 503);

        let health = service.health();
        assert_eq!(health.status, "unhealthy");
        assert!(!health.model_loaded);
    }

    #[tokio::test]
    async fn stats_carry_a_message_only_when_empty() {
        let (service, _dir) = keyword_service();
        let empty = service.stats(&PredictionFilter::default()).await.unwrap();
        assert_eq!(empty.message.as_deref(), Some("No predictions found"));
        assert_eq!(empty.stats.average_confidence, 0.0);

        service.batch_predict(batch(&["Great", "Bad"])).await.unwrap();
        let stats = service.stats(&PredictionFilter::default()).await.unwrap();
        assert_eq!(stats.message, None);
        assert_eq!(stats.stats.total_predictions, 2);
        assert_eq!(stats.stats.positive_percentage, 50.0);

        let nothing = PredictionFilter {
            search: Some("no such tweet".into()),
            ..PredictionFilter::default()
        };
        let filtered = service.stats(&nothing).await.unwrap();
        assert_eq!(
            filtered.message.as_deref(),
            Some("No predictions match the filters")
        );
    }
}
