use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::success;
use crate::core::auth::require_user;
use crate::core::errors::ApiError;
use crate::crawl::canonicalize_url;
use crate::state::AppState;
use crate::store::models::{SourceStatus, SourceType};
use crate::store::sources::NewSource;
use crate::store::ObjectStore;

pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SubmitUrlRequest {
    pub url: String,
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;

    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("bad multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|f| f.to_string())
            .ok_or_else(|| ApiError::validation("file part needs a filename"))?;
        let content_type = field.content_type().map(|c| c.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|_| ApiError::PayloadTooLarge {
                limit_bytes: MAX_UPLOAD_BYTES,
            })?
            .to_vec();
        upload = Some((filename, content_type, bytes));
        break;
    }

    let (filename, content_type, bytes) =
        upload.ok_or_else(|| ApiError::validation("multipart field 'file' is required"))?;

    if bytes.is_empty() {
        return Err(ApiError::validation("empty file"));
    }
    if bytes.len() as u64 > MAX_UPLOAD_BYTES {
        return Err(ApiError::PayloadTooLarge {
            limit_bytes: MAX_UPLOAD_BYTES,
        });
    }

    let source_type = resolve_file_type(content_type.as_deref(), &filename)?;
    let source_id = Uuid::new_v4();
    let storage_path = ObjectStore::source_path(bot.id, source_id, &filename);

    state.objects.put(&storage_path, &bytes).await?;
    let source = state
        .db
        .create_source(NewSource {
            id: source_id,
            bot_id: bot.id,
            source_type,
            original_url: None,
            canonical_url: None,
            storage_path,
            file_size: Some(bytes.len() as i64),
            mime_type: content_type,
        })
        .await?;

    state.ingest.schedule(bot, source.clone());
    Ok(success(source))
}

pub async fn submit_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
    Json(body): Json<SubmitUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;

    let canonical = canonicalize_url(&body.url)?;
    let source = state
        .db
        .create_source(NewSource {
            id: Uuid::new_v4(),
            bot_id: bot.id,
            source_type: SourceType::Html,
            original_url: Some(body.url.trim().to_string()),
            canonical_url: Some(canonical.clone()),
            // URL sources have no object bytes; the path records the page.
            storage_path: canonical,
            file_size: None,
            mime_type: None,
        })
        .await?;

    state.ingest.schedule(bot, source.clone());
    Ok(success(source))
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(bot_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    let sources = state.db.list_sources(bot.id).await?;
    Ok(success(sources))
}

pub async fn get_source(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((bot_id, source_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    let source = state.db.get_source(bot.id, source_id).await?;
    Ok(success(source))
}

pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((bot_id, source_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;

    // Row delete cascades to chunks; object bytes go separately.
    state.db.delete_source(bot.id, source_id).await?;
    state.objects.delete_source_objects(bot.id, source_id).await?;
    Ok(success(serde_json::json!({ "deleted": source_id })))
}

/// Re-run ingestion for a source that failed. Only `failed` sources qualify;
/// anything else is a conflict.
pub async fn reingest_source(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((bot_id, source_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user(&headers, &state.auth).await?;
    let bot = state.db.get_bot_owned(bot_id, user_id).await?;
    let source = state.db.get_source(bot.id, source_id).await?;

    if source.status != SourceStatus::Failed {
        return Err(ApiError::Conflict(format!(
            "source is {}, only failed sources can be re-ingested",
            source.status.as_str()
        )));
    }

    state.db.delete_chunks_for_source(source.id).await?;
    state
        .db
        .update_source_status(source.id, SourceStatus::Uploaded, None)
        .await?;
    let refreshed = state.db.get_source(bot.id, source_id).await?;
    state.ingest.schedule(bot, refreshed.clone());
    Ok(success(refreshed))
}

fn resolve_file_type(content_type: Option<&str>, filename: &str) -> Result<SourceType, ApiError> {
    if let Some(mime) = content_type {
        if let Some(source_type) = SourceType::from_mime(mime) {
            return Ok(source_type);
        }
        return Err(ApiError::UnsupportedFormat(format!(
            "mime type {} is not accepted",
            mime
        )));
    }
    match filename.rsplit('.').next().map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => Ok(SourceType::Pdf),
        Some(ext) if ext == "docx" => Ok(SourceType::Docx),
        Some(ext) if ext == "txt" => Ok(SourceType::Text),
        _ => Err(ApiError::UnsupportedFormat(
            "cannot determine file type; send a content type".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_resolution_prefers_the_mime() {
        assert_eq!(
            resolve_file_type(Some("application/pdf"), "anything.bin").unwrap(),
            SourceType::Pdf
        );
        assert!(matches!(
            resolve_file_type(Some("image/png"), "x.png"),
            Err(ApiError::UnsupportedFormat(_))
        ));
        assert_eq!(
            resolve_file_type(None, "notes.TXT").unwrap(),
            SourceType::Text
        );
        assert!(resolve_file_type(None, "archive").is_err());
    }
}
