use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::errors::ApiError;
use crate::server::handlers::{bots, health, query, sources, tokens, widget};
use crate::state::AppState;

/// Builds the application router.
///
/// Two CORS regimes: the dashboard API allows the configured origins, while
/// `/api/v1/widget/query` allows every origin — widget access control
/// happens inside token validation via the domain allow-list, not at the
/// CORS layer.
pub fn router(state: Arc<AppState>) -> Router {
    let widget_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let widget_routes = Router::new()
        .route("/api/v1/widget/query", post(widget::widget_query))
        .layer(widget_cors);

    let api_routes = Router::new()
        .route("/api/v1/bots", get(bots::list_bots).post(bots::create_bot))
        .route(
            "/api/v1/bots/:bot_id",
            get(bots::get_bot)
                .patch(bots::update_bot)
                .delete(bots::delete_bot),
        )
        .route(
            "/api/v1/bots/:bot_id/sources/upload",
            // The body limit leaves headroom for multipart framing; the
            // handler enforces the exact file-size cap. The outer mapper
            // re-shapes any bare 413 the limit layer produces.
            post(sources::upload_file)
                .layer(DefaultBodyLimit::max(sources::MAX_UPLOAD_BYTES as usize + 64 * 1024))
                .layer(map_response(envelope_oversize_uploads)),
        )
        .route(
            "/api/v1/bots/:bot_id/sources/url",
            post(sources::submit_url),
        )
        .route(
            "/api/v1/bots/:bot_id/sources",
            get(sources::list_sources),
        )
        .route(
            "/api/v1/bots/:bot_id/sources/:source_id",
            get(sources::get_source).delete(sources::delete_source),
        )
        .route(
            "/api/v1/bots/:bot_id/sources/:source_id/reingest",
            post(sources::reingest_source),
        )
        .route(
            "/api/v1/bots/:bot_id/widget-tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route(
            "/api/v1/bots/:bot_id/widget-tokens/:token_id",
            axum::routing::delete(tokens::revoke_token),
        )
        .route("/api/v1/bots/:bot_id/query", post(query::query_bot))
        .route(
            "/api/v1/bots/:bot_id/queries/:query_id/feedback",
            post(query::query_feedback),
        )
        .route(
            "/api/v1/bots/:bot_id/rate-limit",
            get(bots::rate_limit_status),
        )
        .route("/api/v1/bots/:bot_id/analytics", get(bots::analytics))
        .layer(build_api_cors(&state));

    Router::new()
        .route("/health", get(health::health))
        .merge(api_routes)
        .merge(widget_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn build_api_cors(state: &Arc<AppState>) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .settings
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Rejections from the body-limit layer bypass the handler and would go out
/// as a bare 413; rewrite them into the standard error envelope. Handler-made
/// 413s are already JSON and pass through untouched.
async fn envelope_oversize_uploads(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return ApiError::PayloadTooLarge {
            limit_bytes: sources::MAX_UPLOAD_BYTES,
        }
        .into_response();
    }
    response
}
