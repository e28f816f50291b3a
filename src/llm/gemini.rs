use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{estimate_usage, ChatProvider, ChatRequest, Generation};
use crate::core::errors::ApiError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiChat {
    api_key: Option<String>,
    client: Client,
}

impl GeminiChat {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiChat {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<Generation, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::ProviderRejected("missing GEMINI_API_KEY".to_string()))?;

        // Gemini's roles are user/model; assistant history maps to model.
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                let role = if message.role == "assistant" {
                    "model"
                } else {
                    "user"
                };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();

        let model = request.model.trim_start_matches("models/");
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            API_BASE, model, api_key
        );

        let body = json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("gemini chat: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            if text.contains("exceeds the maximum number of tokens") {
                return Err(ApiError::ContextOverflow);
            }
            return Err(if status.is_client_error() {
                ApiError::ProviderRejected(format!("gemini {}: {}", status, truncate(&text)))
            } else {
                ApiError::ProviderUnavailable(format!("gemini {}: {}", status, truncate(&text)))
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("gemini chat body: {}", e)))?;

        let text = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = &payload["usageMetadata"];
        let (prompt_tokens, completion_tokens) = match (
            usage["promptTokenCount"].as_i64(),
            usage["candidatesTokenCount"].as_i64(),
        ) {
            (Some(p), Some(c)) => (p, c),
            _ => estimate_usage(request, &text),
        };

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens,
            total_tokens: usage["totalTokenCount"]
                .as_i64()
                .unwrap_or(prompt_tokens + completion_tokens),
        })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[tokio::test]
    async fn missing_key_is_rejected_without_a_network_call() {
        let provider = GeminiChat::new(None, Duration::from_secs(5));
        let request = ChatRequest {
            system: "sys".into(),
            messages: vec![ChatMessage::user("hi")],
            model: "gemini-1.5-flash".into(),
            temperature: 0.0,
            max_tokens: 16,
        };
        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::ProviderRejected(_)));
    }
}
