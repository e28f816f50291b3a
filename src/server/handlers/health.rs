use axum::response::IntoResponse;
use serde_json::json;

use super::success;

pub async fn health() -> impl IntoResponse {
    success(json!({ "service": "ragdock", "version": env!("CARGO_PKG_VERSION") }))
}
