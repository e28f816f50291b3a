use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::success;
use crate::core::auth::require_user;
use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::store::widget_tokens::NewWidgetToken;

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub allowed_domains: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
}

pub async fn create_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
    Json(body): Json<CreateTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;

    let issued = state
        .db
        .create_widget_token(NewWidgetToken {
            bot_id: bot.id,
            allowed_domains: body.allowed_domains,
            expires_at: body.expires_at,
            name: body.name,
        })
        .await?;

    // The plaintext rides along exactly once; listings only ever see the
    // prefix.
    Ok(success(json!({
        "token": issued.plaintext,
        "record": issued.token,
    })))
}

pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    let tokens = state.db.list_widget_tokens(bot.id).await?;
    Ok(success(tokens))
}

pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((bot_id, token_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    state.db.delete_widget_token(bot.id, token_id).await?;
    Ok(success(json!({ "revoked": token_id })))
}
