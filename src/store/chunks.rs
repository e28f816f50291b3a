use std::cmp::Ordering;

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::models::{ChunkHit, CitationSource, SourceType};
use super::{decode_vector, encode_vector, similarity, Database};
use crate::chunk::DraftChunk;
use crate::core::errors::ApiError;

impl Database {
    /// Persist a source's chunks with their embeddings in one transaction.
    /// All-or-nothing: the `indexed` status invariant (every chunk carries a
    /// vector) is never observable half-true.
    pub async fn insert_chunks(
        &self,
        bot_id: Uuid,
        source_id: Uuid,
        chunks: &[DraftChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, ApiError> {
        if chunks.len() != embeddings.len() {
            return Err(ApiError::Internal(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            sqlx::query(
                "INSERT INTO chunks (id, source_id, bot_id, chunk_index, excerpt, heading,
                                     char_start, char_end, tokens_estimate, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(source_id.to_string())
            .bind(bot_id.to_string())
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.excerpt)
            .bind(&chunk.heading)
            .bind(chunk.char_start as i64)
            .bind(chunk.char_end as i64)
            .bind(chunk.tokens_estimate as i64)
            .bind(encode_vector(embedding))
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(chunks.len())
    }

    pub async fn delete_chunks_for_source(&self, source_id: Uuid) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_id = ?1")
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_chunks_for_source(&self, source_id: Uuid) -> Result<i64, ApiError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?1")
            .bind(source_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Tenant-scoped similarity search. Candidates are restricted in SQL to
    /// the bot's embedded chunks, scored by cosine similarity, ordered
    /// descending with `chunk id` as the deterministic tie-break, cut off at
    /// `min_score` and truncated to `top_k`.
    pub async fn search_chunks(
        &self,
        bot_id: Uuid,
        query_vec: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ChunkHit>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, source_id, excerpt, heading, embedding
             FROM chunks
             WHERE bot_id = ?1 AND embedding IS NOT NULL",
        )
        .bind(bot_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ChunkHit> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            if blob.is_empty() {
                continue;
            }
            let stored = decode_vector(&blob);
            let score = similarity(query_vec, &stored);
            if score < min_score {
                continue;
            }
            let id: String = row.get("id");
            let source_id: String = row.get("source_id");
            scored.push(ChunkHit {
                chunk_id: Uuid::parse_str(&id).map_err(ApiError::internal)?,
                source_id: Uuid::parse_str(&source_id).map_err(ApiError::internal)?,
                excerpt: row.get("excerpt"),
                heading: row.get("heading"),
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(top_k.max(1));
        Ok(scored)
    }

    /// Source details for citation metadata, restricted to the bot.
    pub async fn citation_sources(
        &self,
        bot_id: Uuid,
        source_ids: &[Uuid],
    ) -> Result<Vec<CitationSource>, ApiError> {
        let mut out = Vec::with_capacity(source_ids.len());
        for source_id in source_ids {
            let row = sqlx::query(
                "SELECT id, source_type, original_url, canonical_url, storage_path
                 FROM sources WHERE id = ?1 AND bot_id = ?2",
            )
            .bind(source_id.to_string())
            .bind(bot_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { continue };
            let source_type: String = row.get("source_type");
            let source_type = SourceType::parse(&source_type)
                .ok_or_else(|| ApiError::Internal(format!("bad source_type {}", source_type)))?;
            let storage_path: String = row.get("storage_path");
            let filename = match source_type {
                SourceType::Html => None,
                _ => storage_path.rsplit('/').next().map(|s| s.to_string()),
            };
            out.push(CitationSource {
                source_id: *source_id,
                source_type,
                original_url: row.get("original_url"),
                canonical_url: row.get("canonical_url"),
                storage_path: Some(storage_path),
                filename,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bots::tests::sample_bot;
    use crate::store::sources::tests::file_source;
    use crate::store::test_support::test_db;

    fn draft(index: usize, excerpt: &str) -> DraftChunk {
        DraftChunk {
            chunk_index: index,
            excerpt: excerpt.to_string(),
            heading: Some("Heading".to_string()),
            char_start: index * 10,
            char_end: index * 10 + excerpt.len(),
            tokens_estimate: 5,
        }
    }

    async fn seeded_bot(db: &Database) -> (Uuid, Uuid) {
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();
        let source = db.create_source(file_source(bot.id)).await.unwrap();
        (bot.id, source.id)
    }

    #[tokio::test]
    async fn search_is_ordered_filtered_and_truncated() {
        let db = test_db().await;
        let (bot_id, source_id) = seeded_bot(&db).await;

        let chunks = vec![draft(0, "north"), draft(1, "east"), draft(2, "diagonal")];
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.7, 0.7],
        ];
        db.insert_chunks(bot_id, source_id, &chunks, &embeddings)
            .await
            .unwrap();

        let hits = db
            .search_chunks(bot_id, &[1.0, 0.0], 2, 0.25)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].excerpt, "north");
        assert_eq!(hits[1].excerpt, "diagonal");
        assert!(hits[0].score > hits[1].score);
        // The orthogonal vector scores 0.0 and falls below min_score.
        assert!(hits.iter().all(|h| h.excerpt != "east"));
    }

    #[tokio::test]
    async fn search_never_crosses_tenants() {
        let db = test_db().await;
        let (bot_a, source_a) = seeded_bot(&db).await;
        let (bot_b, _) = seeded_bot(&db).await;

        db.insert_chunks(
            bot_a,
            source_a,
            &[draft(0, "the secret launch code is 7243")],
            &[vec![1.0, 0.0]],
        )
        .await
        .unwrap();

        let hits = db.search_chunks(bot_b, &[1.0, 0.0], 5, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn mismatched_lengths_insert_nothing() {
        let db = test_db().await;
        let (bot_id, source_id) = seeded_bot(&db).await;

        let err = db
            .insert_chunks(bot_id, source_id, &[draft(0, "a"), draft(1, "b")], &[vec![1.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(db.count_chunks_for_source(source_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_for_source_clears_chunks() {
        let db = test_db().await;
        let (bot_id, source_id) = seeded_bot(&db).await;
        db.insert_chunks(bot_id, source_id, &[draft(0, "x")], &[vec![1.0, 0.0]])
            .await
            .unwrap();

        assert_eq!(db.delete_chunks_for_source(source_id).await.unwrap(), 1);
        assert_eq!(db.count_chunks_for_source(source_id).await.unwrap(), 0);
    }
}
