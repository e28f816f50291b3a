pub mod bots;
pub mod health;
pub mod query;
pub mod sources;
pub mod tokens;
pub mod widget;

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Success envelope shared by every endpoint; errors get the matching shape
/// from `ApiError::into_response`.
pub fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "status": "success", "data": data, "message": Value::Null }))
}
