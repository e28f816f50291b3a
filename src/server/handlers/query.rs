use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::success;
use crate::core::auth::require_user;
use crate::core::errors::ApiError;
use crate::rag::QueryOptions;
use crate::state::AppState;
use crate::store::models::Bot;
use crate::store::queries::HistoryPair;

const TOP_K_MAX: usize = 20;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query_text: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub session_id: Option<String>,
    pub page_url: Option<String>,
    /// Prior turns supplied by the client (e.g. widget localStorage).
    pub history: Option<Vec<HistoryTurn>>,
    pub include_metadata: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    pub query: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: String,
}

pub(crate) fn to_options(body: QueryRequest, include_metadata: bool) -> Result<QueryOptions, ApiError> {
    if let Some(top_k) = body.top_k {
        if top_k == 0 || top_k > TOP_K_MAX {
            return Err(ApiError::validation(format!(
                "top_k must be within [1, {}]",
                TOP_K_MAX
            )));
        }
    }
    if let Some(min_score) = body.min_score {
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ApiError::validation("min_score must be within [0, 1]"));
        }
    }

    Ok(QueryOptions {
        top_k: body.top_k,
        min_score: body.min_score,
        session_id: body.session_id,
        page_url: body.page_url,
        history: body.history.map(|turns| {
            turns
                .into_iter()
                .map(|t| HistoryPair {
                    query: t.query,
                    response: t.response,
                })
                .collect()
        }),
        include_metadata,
    })
}

pub(crate) async fn enforce_rate_limit(state: &AppState, bot: &Bot) -> Result<(), ApiError> {
    let limit = bot
        .rate_limit_per_minute
        .unwrap_or(state.settings.rate_limit_per_minute);
    state.db.check_rate_limit(bot.id, limit).await
}

/// Dashboard query: owner-authenticated, metadata allowed.
pub async fn query_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
    Json(body): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;

    enforce_rate_limit(&state, &bot).await?;

    let include_metadata = body.include_metadata.unwrap_or(false);
    let query_text = body.query_text.clone();
    let options = to_options(body, include_metadata)?;
    let outcome = state.engine.query(&bot, &query_text, options).await?;
    Ok(success(outcome))
}

/// Owner feedback on a logged query.
pub async fn query_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((bot_id, query_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;

    if body.feedback != "up" && body.feedback != "down" {
        return Err(ApiError::validation("feedback must be 'up' or 'down'"));
    }
    state
        .db
        .set_query_feedback(bot.id, query_id, &body.feedback)
        .await?;
    Ok(success(serde_json::json!({ "query_id": query_id, "feedback": body.feedback })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(top_k: Option<usize>, min_score: Option<f32>) -> QueryRequest {
        QueryRequest {
            query_text: "q".into(),
            top_k,
            min_score,
            session_id: None,
            page_url: None,
            history: None,
            include_metadata: None,
        }
    }

    #[test]
    fn bounds_are_validated() {
        assert!(to_options(request(Some(0), None), false).is_err());
        assert!(to_options(request(Some(21), None), false).is_err());
        assert!(to_options(request(None, Some(1.5)), false).is_err());
        assert!(to_options(request(Some(5), Some(0.3)), false).is_ok());
    }

    #[test]
    fn history_turns_map_to_pairs() {
        let body = QueryRequest {
            history: Some(vec![HistoryTurn {
                query: "hi".into(),
                response: "hello".into(),
            }]),
            ..request(None, None)
        };
        let options = to_options(body, true).unwrap();
        let history = options.history.unwrap();
        assert_eq!(history[0].query, "hi");
        assert!(options.include_metadata);
    }
}
