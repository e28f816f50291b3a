//! Tenant-scoped persistence.
//!
//! One sqlite database holds the whole ownership DAG: bots own sources,
//! chunks, query logs, widget tokens and rate counters, with cascading
//! deletes top-down. Every repository method that acts on behalf of a user
//! takes the acting owner id and verifies it against `bots.owner_id`;
//! widget-token-authorized paths take a bot id that was already resolved by
//! token validation and can touch nothing outside that bot.

pub mod bots;
mod chunks;
pub mod models;
mod objects;
pub mod queries;
pub mod rate_counters;
pub mod sources;
pub mod widget_tokens;

pub use objects::ObjectStore;

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(db_path: &Path, max_connections: u32) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections.max(2))
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        const SCHEMA: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                system_prompt TEXT NOT NULL,
                llm_provider TEXT NOT NULL DEFAULT 'openai',
                llm_config TEXT NOT NULL DEFAULT '{}',
                retention_days INTEGER NOT NULL DEFAULT 90,
                rate_limit_per_minute INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_bots_owner ON bots(owner_id)",
            "CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                source_type TEXT NOT NULL,
                original_url TEXT,
                canonical_url TEXT,
                storage_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'uploaded',
                error_message TEXT,
                etag TEXT,
                last_modified TEXT,
                page_checksum TEXT,
                file_size INTEGER,
                mime_type TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sources_bot ON sources(bot_id)",
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                excerpt TEXT NOT NULL,
                heading TEXT,
                publish_date TEXT,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                tokens_estimate INTEGER NOT NULL DEFAULT 0,
                embedding BLOB,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_chunks_bot ON chunks(bot_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id, chunk_index)",
            "CREATE TABLE IF NOT EXISTS query_logs (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                session_id TEXT NOT NULL,
                query_text TEXT NOT NULL,
                page_url TEXT,
                returned_sources TEXT NOT NULL DEFAULT '[]',
                response_summary TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                confidence REAL,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                user_feedback TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_query_logs_bot ON query_logs(bot_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_query_logs_session
                ON query_logs(bot_id, session_id, created_at)",
            "CREATE TABLE IF NOT EXISTS widget_tokens (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                token_hash TEXT NOT NULL,
                token_prefix TEXT,
                allowed_domains TEXT NOT NULL DEFAULT '[]',
                expires_at TEXT,
                name TEXT,
                last_used_at TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_widget_tokens_hash
                ON widget_tokens(token_hash COLLATE NOCASE)",
            "CREATE TABLE IF NOT EXISTS rate_counters (
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                window_start TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (bot_id, window_start)
            )",
        ];

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;
        }
        Ok(())
    }
}

/// Chunk vectors persist as little-endian f32 BLOBs, 4 bytes per lane.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Inverse of `encode_vector`. A trailing partial lane (corrupt blob) is
/// dropped rather than guessed at.
pub(crate) fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|lane| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(lane);
            f32::from_le_bytes(bytes)
        })
        .collect()
}

/// Cosine similarity between a query vector and a stored candidate, in one
/// pass over the pair. Mismatched lengths and zero-norm inputs score 0.
pub(crate) fn similarity(query: &[f32], candidate: &[f32]) -> f32 {
    if query.len() != candidate.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut query_sq = 0.0f32;
    let mut candidate_sq = 0.0f32;
    for (q, c) in query.iter().zip(candidate) {
        dot += q * c;
        query_sq += q * q;
        candidate_sq += c * c;
    }
    let norm = (query_sq * candidate_sq).sqrt();
    if norm <= f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_timestamp_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_round_trip_through_blobs() {
        let original = vec![0.25f32, -1.5, 3.75, 0.0];
        let blob = encode_vector(&original);
        assert_eq!(blob.len(), 16);
        assert_eq!(decode_vector(&blob), original);

        // A truncated blob drops the partial lane instead of inventing one.
        assert_eq!(decode_vector(&blob[..7]), vec![0.25f32]);
    }

    #[test]
    fn similarity_handles_degenerate_inputs() {
        assert_eq!(similarity(&[], &[]), 0.0);
        assert_eq!(similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!((similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn schema_initializes_idempotently() {
        let db = test_support::test_db().await;
        db.init_schema().await.unwrap();
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert!(count >= 6);
    }
}
