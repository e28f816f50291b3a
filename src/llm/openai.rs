use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{estimate_usage, ChatProvider, ChatRequest, Generation};
use crate::core::errors::ApiError;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiChat {
    api_key: Option<String>,
    client: Client,
}

impl OpenAiChat {
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
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<Generation, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::ProviderRejected("missing OPENAI_API_KEY".to_string()))?;

        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        for message in &request.messages {
            messages.push(json!({ "role": message.role, "content": message.content }));
        }

        let body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        let res = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("openai chat: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            if text.contains("context_length_exceeded") || text.contains("maximum context length")
            {
                return Err(ApiError::ContextOverflow);
            }
            return Err(if status.is_client_error() {
                ApiError::ProviderRejected(format!("openai {}: {}", status, truncate(&text)))
            } else {
                ApiError::ProviderUnavailable(format!("openai {}: {}", status, truncate(&text)))
            });
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("openai chat body: {}", e)))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let usage = &payload["usage"];
        let (prompt_tokens, completion_tokens) = match (
            usage["prompt_tokens"].as_i64(),
            usage["completion_tokens"].as_i64(),
        ) {
            (Some(p), Some(c)) => (p, c),
            _ => estimate_usage(request, &text),
        };

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens,
            total_tokens: usage["total_tokens"]
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
        let provider = OpenAiChat::new(None, Duration::from_secs(5));
        let request = ChatRequest {
            system: "sys".into(),
            messages: vec![ChatMessage::user("hi")],
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
            max_tokens: 16,
        };
        let err = provider.generate(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::ProviderRejected(_)));
    }
}
