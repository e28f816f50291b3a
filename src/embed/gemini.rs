use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::EmbeddingProvider;
use crate::core::errors::ApiError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiEmbeddings {
    api_key: Option<String>,
    model: String,
    dimension: usize,
    client: Client,
}

impl GeminiEmbeddings {
    pub fn new(
        api_key: Option<String>,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            model,
            dimension,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// The API wants the `models/` prefix; config values may omit it.
    fn model_id(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddings {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::ProviderRejected("missing GEMINI_API_KEY".to_string()))?;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model_id = self.model_id();
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": model_id,
                    "content": { "parts": [{ "text": text }] },
                    "outputDimensionality": self.dimension,
                })
            })
            .collect();

        let url = format!("{}/{}:batchEmbedContents?key={}", API_BASE, model_id, api_key);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("gemini embeddings: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("gemini embeddings body: {}", e)))?;

        let Some(embeddings) = payload["embeddings"].as_array() else {
            return Err(ApiError::ProviderRejected(
                "gemini embeddings: malformed response".to_string(),
            ));
        };

        let vectors = embeddings
            .iter()
            .map(|item| {
                item["values"]
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();
        Ok(vectors)
    }
}

fn classify_failure(status: reqwest::StatusCode, body: &str) -> ApiError {
    if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
        || status == reqwest::StatusCode::NOT_FOUND
        || status == reqwest::StatusCode::BAD_REQUEST
    {
        ApiError::ProviderRejected(format!("gemini {}: {}", status, truncate(body)))
    } else {
        ApiError::ProviderUnavailable(format!("gemini {}: {}", status, truncate(body)))
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}
