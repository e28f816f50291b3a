use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub current_count: i64,
    pub max_requests: i64,
    pub remaining: i64,
    pub window_start: DateTime<Utc>,
    pub reset_time: DateTime<Utc>,
}

fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn seconds_to_next_window(now: DateTime<Utc>) -> u64 {
    60 - u64::from(now.second()) % 60
}

impl Database {
    /// Atomically bump the minute-window counter for a bot and enforce the
    /// limit. One upsert round-trip; the returned count decides acceptance.
    pub async fn check_rate_limit(&self, bot_id: Uuid, limit: i64) -> Result<(), ApiError> {
        let now = Utc::now();
        let window = window_start(now).to_rfc3339();

        let count: i64 = sqlx::query_scalar(
            "INSERT INTO rate_counters (bot_id, window_start, count)
             VALUES (?1, ?2, 1)
             ON CONFLICT (bot_id, window_start) DO UPDATE SET count = count + 1
             RETURNING count",
        )
        .bind(bot_id.to_string())
        .bind(&window)
        .fetch_one(&self.pool)
        .await?;

        if count > limit {
            return Err(ApiError::RateLimited {
                retry_after_s: seconds_to_next_window(now),
            });
        }
        Ok(())
    }

    pub async fn rate_limit_status(
        &self,
        bot_id: Uuid,
        limit: i64,
    ) -> Result<RateLimitStatus, ApiError> {
        let now = Utc::now();
        let window = window_start(now);

        let row = sqlx::query(
            "SELECT count FROM rate_counters WHERE bot_id = ?1 AND window_start = ?2",
        )
        .bind(bot_id.to_string())
        .bind(window.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        let current_count: i64 = row.map(|r| r.get("count")).unwrap_or(0);
        Ok(RateLimitStatus {
            current_count,
            max_requests: limit,
            remaining: (limit - current_count).max(0),
            window_start: window,
            reset_time: window + Duration::minutes(1),
        })
    }

    /// Drop counter rows whose window started more than an hour ago.
    pub async fn cleanup_rate_counters(&self) -> Result<u64, ApiError> {
        let cutoff = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let result = sqlx::query("DELETE FROM rate_counters WHERE window_start < ?1")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bots::tests::sample_bot;
    use crate::store::test_support::test_db;

    #[tokio::test]
    async fn limit_accepts_nth_and_rejects_n_plus_first() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();

        for _ in 0..3 {
            db.check_rate_limit(bot.id, 3).await.unwrap();
        }
        let err = db.check_rate_limit(bot.id, 3).await.unwrap_err();
        match err {
            ApiError::RateLimited { retry_after_s } => {
                assert!((1..=60).contains(&retry_after_s));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn counters_are_per_bot() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot_a = db.create_bot(owner, sample_bot()).await.unwrap();
        let bot_b = db.create_bot(owner, sample_bot()).await.unwrap();

        db.check_rate_limit(bot_a.id, 1).await.unwrap();
        assert!(db.check_rate_limit(bot_a.id, 1).await.is_err());
        db.check_rate_limit(bot_b.id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_remaining_budget() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();

        db.check_rate_limit(bot.id, 10).await.unwrap();
        db.check_rate_limit(bot.id, 10).await.unwrap();

        let status = db.rate_limit_status(bot.id, 10).await.unwrap();
        assert_eq!(status.current_count, 2);
        assert_eq!(status.remaining, 8);
        assert_eq!(status.reset_time, status.window_start + Duration::minutes(1));
    }

    #[tokio::test]
    async fn old_windows_are_swept() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();

        sqlx::query("INSERT INTO rate_counters (bot_id, window_start, count) VALUES (?1, ?2, 5)")
            .bind(bot.id.to_string())
            .bind((Utc::now() - Duration::hours(3)).to_rfc3339())
            .execute(db.pool())
            .await
            .unwrap();
        db.check_rate_limit(bot.id, 10).await.unwrap();

        assert_eq!(db.cleanup_rate_counters().await.unwrap(), 1);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rate_counters")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
