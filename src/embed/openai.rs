use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::EmbeddingProvider;
use crate::core::errors::ApiError;

const API_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiEmbeddings {
    api_key: Option<String>,
    model: String,
    dimension: usize,
    client: Client,
}

impl OpenAiEmbeddings {
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
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::ProviderRejected("missing OPENAI_API_KEY".to_string()))?;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimension,
        });

        let res = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("openai embeddings: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("openai embeddings body: {}", e)))?;

        let mut vectors = Vec::with_capacity(texts.len());
        let Some(data) = payload["data"].as_array() else {
            return Err(ApiError::ProviderRejected(
                "openai embeddings: malformed response".to_string(),
            ));
        };
        for item in data {
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default();
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

fn classify_failure(status: reqwest::StatusCode, body: &str) -> ApiError {
    if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
        || status == reqwest::StatusCode::NOT_FOUND
        || status == reqwest::StatusCode::BAD_REQUEST
    {
        ApiError::ProviderRejected(format!("openai {}: {}", status, truncate(body)))
    } else {
        ApiError::ProviderUnavailable(format!("openai {}: {}", status, truncate(body)))
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_rejected_without_a_network_call() {
        let provider = OpenAiEmbeddings::new(
            None,
            "text-embedding-3-small".to_string(),
            1536,
            Duration::from_secs(5),
        );
        let err = provider.embed(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, ApiError::ProviderRejected(_)));
    }

    #[test]
    fn auth_and_quota_statuses_classify_differently() {
        assert!(matches!(
            classify_failure(reqwest::StatusCode::UNAUTHORIZED, "bad key"),
            ApiError::ProviderRejected(_)
        ));
        assert!(matches!(
            classify_failure(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ApiError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            classify_failure(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            ApiError::ProviderUnavailable(_)
        ));
    }
}
