use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;

use super::query::{enforce_rate_limit, to_options, QueryRequest};
use super::success;
use crate::core::auth::bearer_token;
use crate::core::errors::ApiError;
use crate::state::AppState;

/// Origin of the calling page: the Origin header, else Referer. The domain
/// allow-list is checked against this, not by CORS (the endpoint is
/// CORS-open on purpose).
fn request_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Public widget query. The bearer token is a widget token; it resolves to
/// exactly one bot and nothing else in that owner's account is reachable.
pub async fn widget_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let origin = request_origin(&headers);

    let bot_id = state
        .db
        .validate_widget_token(token, origin.as_deref())
        .await
        .map_err(|err| match err {
            // Unknown tokens read as unauthorized to the public caller.
            ApiError::NotFound(_) => ApiError::Unauthorized,
            other => other,
        })?;

    let bot = state.db.get_bot_any(bot_id).await?;
    enforce_rate_limit(&state, &bot).await?;

    // Widget responses never carry source metadata.
    let query_text = body.query_text.clone();
    let options = to_options(body, false)?;
    let outcome = state.engine.query(&bot, &query_text, options).await?;
    Ok(success(outcome))
}
