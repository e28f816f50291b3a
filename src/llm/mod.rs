//! Chat providers and the generation service.
//!
//! Providers speak their native wire format and always come back with usage
//! metrics (estimated with the tokenizer when the API omits them). The
//! service picks the bot's configured provider and falls back to the
//! alternate, with that provider's default model, when the preferred one is
//! unreachable.

mod gemini;
mod openai;

pub use gemini::GeminiChat;
pub use openai::OpenAiChat;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::config::{ProviderKind, Settings};
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &ChatRequest) -> Result<Generation, ApiError>;
}

pub struct LlmService {
    openai: Arc<dyn ChatProvider>,
    gemini: Arc<dyn ChatProvider>,
    openai_default_model: String,
    gemini_default_model: String,
}

impl LlmService {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            openai: Arc::new(OpenAiChat::new(
                settings.openai_api_key.clone(),
                settings.timeouts.llm,
            )),
            gemini: Arc::new(GeminiChat::new(
                settings.gemini_api_key.clone(),
                settings.timeouts.llm,
            )),
            openai_default_model: settings.openai_chat_model.clone(),
            gemini_default_model: settings.gemini_chat_model.clone(),
        }
    }

    pub fn with_providers(
        openai: Arc<dyn ChatProvider>,
        gemini: Arc<dyn ChatProvider>,
        openai_default_model: String,
        gemini_default_model: String,
    ) -> Self {
        Self {
            openai,
            gemini,
            openai_default_model,
            gemini_default_model,
        }
    }

    fn provider(&self, kind: ProviderKind) -> &Arc<dyn ChatProvider> {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    fn default_model(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::OpenAi => &self.openai_default_model,
            ProviderKind::Gemini => &self.gemini_default_model,
        }
    }

    /// Generate with the preferred provider; on an outage, retry once on the
    /// alternate using its default model (the configured model name belongs
    /// to the preferred provider's namespace).
    pub async fn generate(
        &self,
        preferred: ProviderKind,
        request: &ChatRequest,
    ) -> Result<Generation, ApiError> {
        match self.provider(preferred).generate(request).await {
            Ok(generation) => Ok(generation),
            Err(err) if should_fail_over(&err) => {
                let alternate = preferred.other();
                warn!(
                    "chat provider {} failed ({}); retrying via {}",
                    self.provider(preferred).name(),
                    err,
                    self.provider(alternate).name()
                );
                let fallback_request = ChatRequest {
                    model: self.default_model(alternate).to_string(),
                    ..request.clone()
                };
                self.provider(alternate).generate(&fallback_request).await
            }
            Err(err) => Err(err),
        }
    }
}

fn should_fail_over(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::ProviderUnavailable(_) | ApiError::ProviderRejected(_)
    )
}

/// Usage numbers for providers that do not report them.
pub(crate) fn estimate_usage(request: &ChatRequest, completion: &str) -> (i64, i64) {
    let mut prompt_text = request.system.clone();
    for message in &request.messages {
        prompt_text.push('\n');
        prompt_text.push_str(&message.content);
    }
    let prompt = crate::tokenizer::count_tokens(&prompt_text, &request.model) as i64;
    let completion = crate::tokenizer::count_tokens(completion, &request.model) as i64;
    (prompt, completion)
}
