use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::models::{Source, SourceStatus, SourceType};
use super::{parse_timestamp, Database};
use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct NewSource {
    /// Caller-generated so the storage path can embed it before the insert.
    pub id: Uuid,
    pub bot_id: Uuid,
    pub source_type: SourceType,
    pub original_url: Option<String>,
    pub canonical_url: Option<String>,
    pub storage_path: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

/// Crawl metadata recorded after a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct CrawlMeta {
    pub canonical_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub page_checksum: Option<String>,
}

impl Database {
    pub async fn create_source(&self, new: NewSource) -> Result<Source, ApiError> {
        let id = new.id;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO sources (id, bot_id, source_type, original_url, canonical_url,
                                  storage_path, status, file_size, mime_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        )
        .bind(id.to_string())
        .bind(new.bot_id.to_string())
        .bind(new.source_type.as_str())
        .bind(&new.original_url)
        .bind(&new.canonical_url)
        .bind(&new.storage_path)
        .bind(SourceStatus::Uploaded.as_str())
        .bind(new.file_size)
        .bind(&new.mime_type)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_source(new.bot_id, id).await
    }

    pub async fn get_source(&self, bot_id: Uuid, source_id: Uuid) -> Result<Source, ApiError> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?1 AND bot_id = ?2")
            .bind(source_id.to_string())
            .bind(bot_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("source {}", source_id)))?;
        row_to_source(&row)
    }

    pub async fn list_sources(&self, bot_id: Uuid) -> Result<Vec<Source>, ApiError> {
        let rows = sqlx::query("SELECT * FROM sources WHERE bot_id = ?1 ORDER BY created_at DESC")
            .bind(bot_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_source).collect()
    }

    /// Cascades to the source's chunks via foreign keys. Object-store bytes
    /// are the caller's concern.
    pub async fn delete_source(&self, bot_id: Uuid, source_id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?1 AND bot_id = ?2")
            .bind(source_id.to_string())
            .bind(bot_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("source {}", source_id)));
        }
        Ok(())
    }

    /// Status writes come only from the source's own ingestion job.
    pub async fn update_source_status(
        &self,
        source_id: Uuid,
        status: SourceStatus,
        error_message: Option<&str>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE sources SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(source_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_source_crawl_meta(
        &self,
        source_id: Uuid,
        meta: &CrawlMeta,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE sources SET canonical_url = COALESCE(?1, canonical_url), etag = ?2,
                                last_modified = ?3, page_checksum = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .bind(&meta.canonical_url)
        .bind(&meta.etag)
        .bind(&meta.last_modified)
        .bind(&meta.page_checksum)
        .bind(Utc::now().to_rfc3339())
        .bind(source_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_source_checksum(
        &self,
        source_id: Uuid,
        checksum: &str,
    ) -> Result<(), ApiError> {
        sqlx::query("UPDATE sources SET page_checksum = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(checksum)
            .bind(Utc::now().to_rfc3339())
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source, ApiError> {
    let id: String = row.get("id");
    let bot_id: String = row.get("bot_id");
    let source_type: String = row.get("source_type");
    let status: String = row.get("status");

    Ok(Source {
        id: Uuid::parse_str(&id).map_err(ApiError::internal)?,
        bot_id: Uuid::parse_str(&bot_id).map_err(ApiError::internal)?,
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| ApiError::Internal(format!("bad source_type {}", source_type)))?,
        original_url: row.get("original_url"),
        canonical_url: row.get("canonical_url"),
        storage_path: row.get("storage_path"),
        status: SourceStatus::parse(&status)
            .ok_or_else(|| ApiError::Internal(format!("bad status {}", status)))?,
        error_message: row.get("error_message"),
        etag: row.get("etag"),
        last_modified: row.get("last_modified"),
        page_checksum: row.get("page_checksum"),
        file_size: row.get("file_size"),
        mime_type: row.get("mime_type"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at")),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::bots::tests::sample_bot;
    use crate::store::test_support::test_db;

    pub(crate) fn file_source(bot_id: Uuid) -> NewSource {
        NewSource {
            id: Uuid::new_v4(),
            bot_id,
            source_type: SourceType::Pdf,
            original_url: None,
            canonical_url: None,
            storage_path: format!("bots/{}/sources/x/manual.pdf", bot_id),
            file_size: Some(1024),
            mime_type: Some("application/pdf".to_string()),
        }
    }

    #[tokio::test]
    async fn source_lifecycle_and_status_updates() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();

        let source = db.create_source(file_source(bot.id)).await.unwrap();
        assert_eq!(source.status, SourceStatus::Uploaded);

        db.update_source_status(source.id, SourceStatus::Parsing, None)
            .await
            .unwrap();
        db.update_source_status(source.id, SourceStatus::Failed, Some("pdf: broken"))
            .await
            .unwrap();

        let failed = db.get_source(bot.id, source.id).await.unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("pdf: broken"));
    }

    #[tokio::test]
    async fn sources_are_scoped_to_their_bot() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot_a = db.create_bot(owner, sample_bot()).await.unwrap();
        let bot_b = db.create_bot(owner, sample_bot()).await.unwrap();

        let source = db.create_source(file_source(bot_a.id)).await.unwrap();
        assert!(db.get_source(bot_b.id, source.id).await.is_err());
        assert!(db.delete_source(bot_b.id, source.id).await.is_err());
        assert!(db.delete_source(bot_a.id, source.id).await.is_ok());
    }

    #[tokio::test]
    async fn deleting_a_bot_cascades_to_sources() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();
        db.create_source(file_source(bot.id)).await.unwrap();

        db.delete_bot(bot.id, owner).await.unwrap();
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
