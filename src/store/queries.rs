use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::models::{Citation, QueryLog};
use super::{parse_timestamp, Database};
use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct NewQueryLog {
    pub bot_id: Uuid,
    pub session_id: String,
    pub query_text: String,
    pub page_url: Option<String>,
    pub returned_sources: Vec<Citation>,
    pub response_summary: String,
    pub tokens_used: i64,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub confidence: Option<f64>,
    pub latency_ms: i64,
}

/// A previous query/response pair usable as chat history.
#[derive(Debug, Clone)]
pub struct HistoryPair {
    pub query: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub total_queries: i64,
    pub queries_last_7_days: i64,
    pub avg_confidence: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub feedback_up: i64,
    pub feedback_down: i64,
}

impl Database {
    pub async fn insert_query_log(&self, new: NewQueryLog) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let citations_json =
            serde_json::to_string(&new.returned_sources).map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT INTO query_logs (id, bot_id, session_id, query_text, page_url,
                                     returned_sources, response_summary, tokens_used,
                                     prompt_tokens, completion_tokens, confidence,
                                     latency_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(id.to_string())
        .bind(new.bot_id.to_string())
        .bind(&new.session_id)
        .bind(&new.query_text)
        .bind(&new.page_url)
        .bind(&citations_json)
        .bind(&new.response_summary)
        .bind(new.tokens_used)
        .bind(new.prompt_tokens)
        .bind(new.completion_tokens)
        .bind(new.confidence)
        .bind(new.latency_ms)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Most recent query/response pairs for a session, oldest first.
    pub async fn recent_history(
        &self,
        bot_id: Uuid,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryPair>, ApiError> {
        let rows = sqlx::query(
            "SELECT query_text, response_summary FROM query_logs
             WHERE bot_id = ?1 AND session_id = ?2
             ORDER BY created_at DESC LIMIT ?3",
        )
        .bind(bot_id.to_string())
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut pairs: Vec<HistoryPair> = rows
            .iter()
            .map(|row| HistoryPair {
                query: row.get("query_text"),
                response: row.get("response_summary"),
            })
            .filter(|p| !p.query.is_empty() && !p.response.is_empty())
            .collect();
        pairs.reverse();
        Ok(pairs)
    }

    pub async fn list_query_logs(
        &self,
        bot_id: Uuid,
        limit: i64,
    ) -> Result<Vec<QueryLog>, ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM query_logs WHERE bot_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )
        .bind(bot_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_query_log).collect()
    }

    /// Record visitor feedback. The bot id scopes the write to rows the
    /// caller may touch.
    pub async fn set_query_feedback(
        &self,
        bot_id: Uuid,
        query_id: Uuid,
        feedback: &str,
    ) -> Result<(), ApiError> {
        let result =
            sqlx::query("UPDATE query_logs SET user_feedback = ?1 WHERE id = ?2 AND bot_id = ?3")
                .bind(feedback)
                .bind(query_id.to_string())
                .bind(bot_id.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("query {}", query_id)));
        }
        Ok(())
    }

    pub async fn analytics_summary(&self, bot_id: Uuid) -> Result<AnalyticsSummary, ApiError> {
        let week_ago = (Utc::now() - Duration::days(7)).to_rfc3339();
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    SUM(CASE WHEN created_at >= ?2 THEN 1 ELSE 0 END) AS recent,
                    AVG(confidence) AS avg_confidence,
                    AVG(latency_ms) AS avg_latency,
                    SUM(CASE WHEN user_feedback = 'up' THEN 1 ELSE 0 END) AS up,
                    SUM(CASE WHEN user_feedback = 'down' THEN 1 ELSE 0 END) AS down
             FROM query_logs WHERE bot_id = ?1",
        )
        .bind(bot_id.to_string())
        .bind(&week_ago)
        .fetch_one(&self.pool)
        .await?;

        Ok(AnalyticsSummary {
            total_queries: row.get("total"),
            queries_last_7_days: row.get::<Option<i64>, _>("recent").unwrap_or(0),
            avg_confidence: row.get("avg_confidence"),
            avg_latency_ms: row.get("avg_latency"),
            feedback_up: row.get::<Option<i64>, _>("up").unwrap_or(0),
            feedback_down: row.get::<Option<i64>, _>("down").unwrap_or(0),
        })
    }

    /// Purge query logs older than each bot's retention window. Returns the
    /// number of rows removed.
    pub async fn purge_expired_query_logs(&self) -> Result<u64, ApiError> {
        let result = sqlx::query(
            "DELETE FROM query_logs WHERE id IN (
                 SELECT q.id FROM query_logs q
                 JOIN bots b ON b.id = q.bot_id
                 WHERE q.created_at < strftime('%Y-%m-%dT%H:%M:%S', 'now', '-' || b.retention_days || ' days')
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_query_log(row: &sqlx::sqlite::SqliteRow) -> Result<QueryLog, ApiError> {
    let id: String = row.get("id");
    let bot_id: String = row.get("bot_id");
    let citations_json: String = row.get("returned_sources");

    Ok(QueryLog {
        id: Uuid::parse_str(&id).map_err(ApiError::internal)?,
        bot_id: Uuid::parse_str(&bot_id).map_err(ApiError::internal)?,
        session_id: row.get("session_id"),
        query_text: row.get("query_text"),
        page_url: row.get("page_url"),
        returned_sources: serde_json::from_str(&citations_json).unwrap_or_default(),
        response_summary: row.get("response_summary"),
        tokens_used: row.get("tokens_used"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        confidence: row.get("confidence"),
        latency_ms: row.get("latency_ms"),
        user_feedback: row.get("user_feedback"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
    })
}
