use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::success;
use crate::core::auth::require_user;
use crate::core::config::ProviderKind;
use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::store::bots::{BotPatch, NewBot};
use crate::store::models::LlmConfig;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the provided context to answer. \
     If unsure, say you don't know.";

const RETENTION_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub llm_provider: Option<String>,
    pub llm_config: Option<LlmConfig>,
    pub retention_days: Option<i64>,
    pub rate_limit_per_minute: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateBotRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub llm_provider: Option<String>,
    pub llm_config: Option<LlmConfig>,
    pub retention_days: Option<i64>,
    pub rate_limit_per_minute: Option<i64>,
}

fn validate_provider(value: &str) -> Result<(), ApiError> {
    ProviderKind::parse(value)
        .map(|_| ())
        .ok_or_else(|| ApiError::validation(format!("unknown llm_provider: {}", value)))
}

fn validate_retention(days: i64) -> Result<(), ApiError> {
    if RETENTION_RANGE.contains(&days) {
        Ok(())
    } else {
        Err(ApiError::validation(
            "retention_days must be within [1, 3650]",
        ))
    }
}

pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;

    if body.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    let llm_provider = body.llm_provider.unwrap_or_else(|| "openai".to_string());
    validate_provider(&llm_provider)?;
    let llm_config = body.llm_config.unwrap_or_default();
    llm_config.validate()?;
    let retention_days = body.retention_days.unwrap_or(90);
    validate_retention(retention_days)?;

    let bot = state
        .db
        .create_bot(
            user_id,
            NewBot {
                name: body.name.trim().to_string(),
                description: body.description,
                system_prompt: body
                    .system_prompt
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                llm_provider,
                llm_config,
                retention_days,
                rate_limit_per_minute: body.rate_limit_per_minute,
            },
        )
        .await?;

    Ok(success(bot))
}

pub async fn list_bots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bots = state.db.list_bots(user_id).await?;
    Ok(success(bots))
}

pub async fn get_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    Ok(success(bot))
}

pub async fn update_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
    Json(body): Json<UpdateBotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;

    if let Some(name) = &body.name {
        if name.trim().is_empty() {
            return Err(ApiError::validation("name must not be empty"));
        }
    }
    if let Some(provider) = &body.llm_provider {
        validate_provider(provider)?;
    }
    if let Some(config) = &body.llm_config {
        config.validate()?;
    }
    if let Some(days) = body.retention_days {
        validate_retention(days)?;
    }

    let bot = state
        .db
        .update_bot(
            bot_id,
            user_id,
            BotPatch {
                name: body.name,
                description: body.description.map(Some),
                system_prompt: body.system_prompt,
                llm_provider: body.llm_provider,
                llm_config: body.llm_config,
                retention_days: body.retention_days,
                rate_limit_per_minute: body.rate_limit_per_minute.map(Some),
            },
        )
        .await?;
    Ok(success(bot))
}

pub async fn delete_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    state.db.delete_bot(bot_id, user_id).await?;
    Ok(success(serde_json::json!({ "deleted": bot_id })))
}

pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    let limit = bot
        .rate_limit_per_minute
        .unwrap_or(state.settings.rate_limit_per_minute);
    let status = state.db.rate_limit_status(bot.id, limit).await?;
    Ok(success(status))
}

pub async fn analytics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    let summary = state.db.analytics_summary(bot.id).await?;
    Ok(success(summary))
}
