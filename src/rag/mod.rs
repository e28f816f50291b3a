//! End-to-end RAG query engine: embed the query, search the bot's chunks,
//! compose a budgeted prompt, generate, score confidence, assemble
//! citations, log.

pub mod prompt;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::embed::EmbeddingService;
use crate::llm::{ChatRequest, LlmService};
use crate::store::models::{Bot, Citation};
use crate::store::queries::{HistoryPair, NewQueryLog};
use crate::store::Database;

/// Tokens held back from the context window on top of the response budget.
const SAFETY_MARGIN_TOKENS: usize = 256;
/// Query logs keep at most this much of the answer.
const SUMMARY_MAX_CHARS: usize = 2000;
const CONTEXT_PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    /// Client-supplied history; when absent the engine falls back to the
    /// session's logged queries.
    pub history: Option<Vec<HistoryPair>>,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Option<f64>,
    pub session_id: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_preview: Option<String>,
}

pub struct QueryEngine {
    db: Database,
    embeddings: Arc<EmbeddingService>,
    llm: Arc<LlmService>,
    default_top_k: usize,
    default_min_score: f32,
    model_context_window: usize,
}

impl QueryEngine {
    pub fn new(
        db: Database,
        embeddings: Arc<EmbeddingService>,
        llm: Arc<LlmService>,
        default_top_k: usize,
        default_min_score: f32,
        model_context_window: usize,
    ) -> Self {
        Self {
            db,
            embeddings,
            llm,
            default_top_k,
            default_min_score,
            model_context_window,
        }
    }

    pub async fn query(
        &self,
        bot: &Bot,
        query_text: &str,
        opts: QueryOptions,
    ) -> Result<QueryOutcome, ApiError> {
        if query_text.trim().is_empty() {
            return Err(ApiError::validation("query_text is required"));
        }

        let started = Instant::now();
        let provider = bot.provider_kind();

        let query_vec = self
            .embeddings
            .embed_query(query_text, Some(provider))
            .await?;

        let top_k = opts.top_k.unwrap_or(self.default_top_k);
        let min_score = opts.min_score.unwrap_or(self.default_min_score);
        let hits = self
            .db
            .search_chunks(bot.id, &query_vec, top_k, min_score)
            .await?;
        debug!(
            "retrieved {} chunks for bot {} (top_k={}, min_score={})",
            hits.len(),
            bot.id,
            top_k,
            min_score
        );

        let history = match &opts.history {
            Some(history) => history.clone(),
            None => match &opts.session_id {
                Some(session_id) => self
                    .db
                    .recent_history(bot.id, session_id, prompt::MAX_HISTORY_TURNS as i64)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("failed to load session history: {}", e);
                        Vec::new()
                    }),
                None => Vec::new(),
            },
        };

        let budget = self
            .model_context_window
            .saturating_sub(bot.llm_config.max_tokens as usize)
            .saturating_sub(SAFETY_MARGIN_TOKENS);
        let composed = prompt::compose(&prompt::PromptInputs {
            system_prompt: &bot.system_prompt,
            chunks: &hits,
            history: &history,
            query: query_text,
            model: &bot.llm_config.model_name,
            budget,
        })?;

        let generation = self
            .llm
            .generate(
                provider,
                &ChatRequest {
                    system: composed.system,
                    messages: composed.messages,
                    model: bot.llm_config.model_name.clone(),
                    temperature: bot.llm_config.temperature,
                    max_tokens: bot.llm_config.max_tokens,
                },
            )
            .await?;

        if composed.included_chunks < hits.len() {
            debug!(
                "prompt kept {}/{} retrieved chunks for bot {}",
                composed.included_chunks,
                hits.len(),
                bot.id
            );
        }

        // Confidence and citations cover everything retrieval returned; the
        // composer's budget trim only decides what text reached the model.
        let confidence = if hits.is_empty() {
            None
        } else {
            let mean = hits.iter().map(|h| h.score as f64).sum::<f64>() / hits.len() as f64;
            Some(mean.clamp(0.0, 1.0))
        };

        let mut citations: Vec<Citation> = hits
            .iter()
            .map(|hit| Citation {
                chunk_id: hit.chunk_id,
                heading: hit.heading.clone(),
                score: Some(hit.score),
                source: None,
            })
            .collect();

        if opts.include_metadata && !hits.is_empty() {
            let mut source_ids: Vec<Uuid> = hits.iter().map(|h| h.source_id).collect();
            source_ids.sort();
            source_ids.dedup();
            match self.db.citation_sources(bot.id, &source_ids).await {
                Ok(sources) => {
                    for (citation, hit) in citations.iter_mut().zip(&hits) {
                        citation.source = sources
                            .iter()
                            .find(|s| s.source_id == hit.source_id)
                            .cloned();
                    }
                }
                Err(e) => warn!("failed to join citation sources: {}", e),
            }
        }

        let latency_ms = started.elapsed().as_millis() as i64;
        let session_id = opts
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let log = NewQueryLog {
            bot_id: bot.id,
            session_id: session_id.clone(),
            query_text: query_text.to_string(),
            page_url: opts.page_url.clone(),
            returned_sources: citations.clone(),
            response_summary: truncate_chars(&generation.text, SUMMARY_MAX_CHARS),
            tokens_used: generation.total_tokens,
            prompt_tokens: Some(generation.prompt_tokens),
            completion_tokens: Some(generation.completion_tokens),
            confidence,
            latency_ms,
        };
        if let Err(e) = self.db.insert_query_log(log).await {
            warn!("failed to log query for bot {}: {}", bot.id, e);
        }

        Ok(QueryOutcome {
            answer: generation.text,
            citations,
            confidence,
            session_id,
            prompt_tokens: generation.prompt_tokens,
            completion_tokens: generation.completion_tokens,
            latency_ms,
            context_preview: opts
                .include_metadata
                .then(|| truncate_chars(&composed.context_text, CONTEXT_PREVIEW_CHARS)),
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
