use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::settings::Settings;

use super::{ClassScores, SentimentModel};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const WARM_UP_TEXT: &str = "NegaBot warm-up";

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HubResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
    Error { error: String },
}

/// Sequence classifier served by a hosted inference endpoint.
pub struct HubModel {
    client: reqwest::Client,
    endpoint: String,
    name: String,
    token: Option<String>,
}

impl HubModel {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("failed to build hub HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}",
                settings.hub_url.trim_end_matches('/'),
                settings.model_name
            ),
            name: settings.model_name.clone(),
            token: settings.hub_token.clone(),
        })
    }

    /// Builds the client and confirms the endpoint answers with usable scores.
    pub async fn load(settings: &Settings) -> Result<Self> {
        let model = Self::new(settings)?;
        log_info!("Loading model: {}", model.name);
        if model.token.is_none() {
            log_warn!("No hub token configured; requests are rate limited");
        }

        model
            .classify(WARM_UP_TEXT)
            .await
            .with_context(|| format!("model {} did not answer warm-up request", model.name))?;

        log_info!("Model loaded successfully");
        Ok(model)
    }
}

#[async_trait]
impl SentimentModel for HubModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, text: &str) -> Result<ClassScores> {
        let body = json!({
            "inputs": text,
            "options": { "wait_for_model": true },
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.endpoint))?;
        let status = response.status();
        let payload: HubResponse = response
            .json()
            .await
            .with_context(|| format!("hub answered {status} with an unreadable body"))?;

        if !status.is_success() {
            if let HubResponse::Error { error } = payload {
                bail!("hub answered {status}: {error}");
            }
            bail!("hub answered {status}");
        }

        scores_from_response(payload)
    }
}

fn scores_from_response(payload: HubResponse) -> Result<ClassScores> {
    let items = match payload {
        HubResponse::Nested(mut batches) => {
            if batches.is_empty() {
                bail!("hub returned no predictions");
            }
            batches.swap_remove(0)
        }
        HubResponse::Flat(items) => items,
        HubResponse::Error { error } => bail!("hub error: {error}"),
    };

    scores_from_labels(&items)
}

fn scores_from_labels(items: &[LabelScore]) -> Result<ClassScores> {
    let mut positive = None;
    let mut negative = None;

    for item in items {
        match class_for_label(&item.label)? {
            0 => positive = Some(item.score),
            _ => negative = Some(item.score),
        }
    }

    // With top_k = 1 only the winning label comes back.
    match (positive, negative) {
        (Some(positive), Some(negative)) => Ok(ClassScores { positive, negative }),
        (Some(positive), None) => Ok(ClassScores {
            positive,
            negative: (1.0 - positive).max(0.0),
        }),
        (None, Some(negative)) => Ok(ClassScores {
            positive: (1.0 - negative).max(0.0),
            negative,
        }),
        (None, None) => Err(anyhow!("hub returned no label scores")),
    }
}

fn class_for_label(label: &str) -> Result<u8> {
    match label.to_ascii_uppercase().as_str() {
        "LABEL_0" | "POSITIVE" | "POS" => Ok(0),
        "LABEL_1" | "NEGATIVE" | "NEG" => Ok(1),
        other => Err(anyhow!("unexpected model label '{other}'")),
    }
}
