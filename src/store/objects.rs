//! Filesystem-backed implementation of the object-store contract.
//!
//! Path convention: `bots/{bot_id}/sources/{source_id}/{filename}` under the
//! store root. Only sanitized relative paths are accepted, so a stored path
//! can never escape the root.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn source_path(bot_id: Uuid, source_id: Uuid, filename: &str) -> String {
        format!(
            "bots/{}/sources/{}/{}",
            bot_id,
            source_id,
            sanitize_filename(filename)
        )
    }

    pub async fn put(&self, storage_path: &str, bytes: &[u8]) -> Result<(), ApiError> {
        let path = self.resolve(storage_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(ApiError::internal)?;
        }
        fs::write(&path, bytes).await.map_err(ApiError::internal)
    }

    pub async fn get(&self, storage_path: &str) -> Result<Vec<u8>, ApiError> {
        let path = self.resolve(storage_path)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ApiError::NotFound(format!("object {}", storage_path)))
            }
            Err(e) => Err(ApiError::internal(e)),
        }
    }

    /// Remove one source's directory, bytes included. Missing is fine.
    pub async fn delete_source_objects(
        &self,
        bot_id: Uuid,
        source_id: Uuid,
    ) -> Result<(), ApiError> {
        let dir = self
            .root
            .join("bots")
            .join(bot_id.to_string())
            .join("sources")
            .join(source_id.to_string());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::internal(e)),
        }
    }

    fn resolve(&self, storage_path: &str) -> Result<PathBuf, ApiError> {
        let relative = Path::new(storage_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ApiError::validation("invalid storage path"));
        }
        Ok(self.root.join(relative))
    }
}

fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
