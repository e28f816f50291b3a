use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::ProviderKind;
use crate::core::errors::ApiError;

/// Per-bot generation settings. Unknown fields in stored JSON are ignored on
/// read; shape changes only ever add fields with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            model_name: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.model_name.trim().is_empty() {
            return Err(ApiError::validation("llm_config.model_name is required"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ApiError::validation(
                "llm_config.temperature must be within [0, 2]",
            ));
        }
        if self.max_tokens < 1 {
            return Err(ApiError::validation("llm_config.max_tokens must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Bot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub llm_provider: String,
    pub llm_config: LlmConfig,
    pub retention_days: i64,
    pub rate_limit_per_minute: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::parse(&self.llm_provider).unwrap_or(ProviderKind::OpenAi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Html,
    Text,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Docx => "docx",
            SourceType::Html => "html",
            SourceType::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(SourceType::Pdf),
            "docx" => Some(SourceType::Docx),
            "html" => Some(SourceType::Html),
            "text" => Some(SourceType::Text),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(SourceType::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(SourceType::Docx)
            }
            "text/plain" => Some(SourceType::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Uploaded,
    Parsing,
    Indexed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Uploaded => "uploaded",
            SourceStatus::Parsing => "parsing",
            SourceStatus::Indexed => "indexed",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploaded" => Some(SourceStatus::Uploaded),
            "parsing" => Some(SourceStatus::Parsing),
            "indexed" => Some(SourceStatus::Indexed),
            "failed" => Some(SourceStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub source_type: SourceType,
    pub original_url: Option<String>,
    pub canonical_url: Option<String>,
    pub storage_path: String,
    pub status: SourceStatus,
    pub error_message: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub page_checksum: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn filename(&self) -> Option<&str> {
        match self.source_type {
            SourceType::Html => None,
            _ => self.storage_path.rsplit('/').next(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: Uuid,
    pub source_id: Uuid,
    pub bot_id: Uuid,
    pub chunk_index: i64,
    pub excerpt: String,
    pub heading: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub char_start: i64,
    pub char_end: i64,
    pub tokens_estimate: i64,
    pub created_at: DateTime<Utc>,
}

/// One retrieval hit, as returned by the vector search.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk_id: Uuid,
    pub source_id: Uuid,
    pub excerpt: String,
    pub heading: Option<String>,
    pub score: f32,
}

/// Citation entry on a query response and in the query log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CitationSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationSource {
    pub source_id: Uuid,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryLog {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub session_id: String,
    pub query_text: String,
    pub page_url: Option<String>,
    pub returned_sources: Vec<Citation>,
    pub response_summary: String,
    pub tokens_used: i64,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub confidence: Option<f64>,
    pub latency_ms: i64,
    pub user_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WidgetToken {
    pub id: Uuid,
    pub bot_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub token_prefix: Option<String>,
    pub allowed_domains: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_config_bounds_are_enforced() {
        assert!(LlmConfig::default().validate().is_ok());

        let hot = LlmConfig {
            temperature: 2.5,
            ..LlmConfig::default()
        };
        assert!(hot.validate().is_err());

        let zero = LlmConfig {
            max_tokens: 0,
            ..LlmConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn source_type_maps_upload_mimes() {
        assert_eq!(
            SourceType::from_mime("application/pdf"),
            Some(SourceType::Pdf)
        );
        assert_eq!(SourceType::from_mime("text/plain"), Some(SourceType::Text));
        assert_eq!(SourceType::from_mime("image/png"), None);
    }

    #[test]
    fn file_source_exposes_its_filename() {
        let source = Source {
            id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            source_type: SourceType::Pdf,
            original_url: None,
            canonical_url: None,
            storage_path: "bots/b/sources/s/manual.pdf".to_string(),
            status: SourceStatus::Uploaded,
            error_message: None,
            etag: None,
            last_modified: None,
            page_checksum: None,
            file_size: Some(10),
            mime_type: Some("application/pdf".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(source.filename(), Some("manual.pdf"));
    }
}
