use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::models::{Bot, LlmConfig};
use super::{parse_timestamp, Database};
use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct NewBot {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub llm_provider: String,
    pub llm_config: LlmConfig,
    pub retention_days: i64,
    pub rate_limit_per_minute: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct BotPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub system_prompt: Option<String>,
    pub llm_provider: Option<String>,
    pub llm_config: Option<LlmConfig>,
    pub retention_days: Option<i64>,
    pub rate_limit_per_minute: Option<Option<i64>>,
}

impl Database {
    pub async fn create_bot(&self, owner_id: Uuid, new: NewBot) -> Result<Bot, ApiError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let config_json = serde_json::to_string(&new.llm_config).map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT INTO bots (id, owner_id, name, description, system_prompt, llm_provider,
                               llm_config, retention_days, rate_limit_per_minute, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        )
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.system_prompt)
        .bind(&new.llm_provider)
        .bind(&config_json)
        .bind(new.retention_days)
        .bind(new.rate_limit_per_minute)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_bot_owned(id, owner_id).await
    }

    /// Fetch a bot and verify the acting user owns it. A bot that exists but
    /// belongs to someone else is indistinguishable from a missing one.
    pub async fn get_bot_owned(&self, bot_id: Uuid, owner_id: Uuid) -> Result<Bot, ApiError> {
        let bot = self.get_bot_any(bot_id).await?;
        if bot.owner_id != owner_id {
            return Err(ApiError::NotFound(format!("bot {}", bot_id)));
        }
        Ok(bot)
    }

    /// Fetch without an ownership check. Only the widget path uses this,
    /// after token validation has pinned the bot id.
    pub async fn get_bot_any(&self, bot_id: Uuid) -> Result<Bot, ApiError> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = ?1")
            .bind(bot_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("bot {}", bot_id)))?;
        row_to_bot(&row)
    }

    pub async fn list_bots(&self, owner_id: Uuid) -> Result<Vec<Bot>, ApiError> {
        let rows = sqlx::query("SELECT * FROM bots WHERE owner_id = ?1 ORDER BY created_at DESC")
            .bind(owner_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_bot).collect()
    }

    pub async fn update_bot(
        &self,
        bot_id: Uuid,
        owner_id: Uuid,
        patch: BotPatch,
    ) -> Result<Bot, ApiError> {
        let mut bot = self.get_bot_owned(bot_id, owner_id).await?;

        if let Some(name) = patch.name {
            bot.name = name;
        }
        if let Some(description) = patch.description {
            bot.description = description;
        }
        if let Some(system_prompt) = patch.system_prompt {
            bot.system_prompt = system_prompt;
        }
        if let Some(llm_provider) = patch.llm_provider {
            bot.llm_provider = llm_provider;
        }
        if let Some(llm_config) = patch.llm_config {
            bot.llm_config = llm_config;
        }
        if let Some(retention_days) = patch.retention_days {
            bot.retention_days = retention_days;
        }
        if let Some(rate_limit) = patch.rate_limit_per_minute {
            bot.rate_limit_per_minute = rate_limit;
        }

        let now = Utc::now().to_rfc3339();
        let config_json = serde_json::to_string(&bot.llm_config).map_err(ApiError::internal)?;
        sqlx::query(
            "UPDATE bots SET name = ?1, description = ?2, system_prompt = ?3, llm_provider = ?4,
                             llm_config = ?5, retention_days = ?6, rate_limit_per_minute = ?7,
                             updated_at = ?8
             WHERE id = ?9 AND owner_id = ?10",
        )
        .bind(&bot.name)
        .bind(&bot.description)
        .bind(&bot.system_prompt)
        .bind(&bot.llm_provider)
        .bind(&config_json)
        .bind(bot.retention_days)
        .bind(bot.rate_limit_per_minute)
        .bind(&now)
        .bind(bot_id.to_string())
        .bind(owner_id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_bot_owned(bot_id, owner_id).await
    }

    /// Cascades to sources, chunks, query logs, widget tokens and rate
    /// counters via foreign keys.
    pub async fn delete_bot(&self, bot_id: Uuid, owner_id: Uuid) -> Result<(), ApiError> {
        self.get_bot_owned(bot_id, owner_id).await?;
        sqlx::query("DELETE FROM bots WHERE id = ?1 AND owner_id = ?2")
            .bind(bot_id.to_string())
            .bind(owner_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_bot(row: &sqlx::sqlite::SqliteRow) -> Result<Bot, ApiError> {
    let id: String = row.get("id");
    let owner_id: String = row.get("owner_id");
    let config_json: String = row.get("llm_config");
    // Unknown fields in stored config are ignored; missing ones fall back to
    // defaults rather than failing the read.
    let llm_config: LlmConfig = serde_json::from_str(&config_json).unwrap_or_default();

    Ok(Bot {
        id: Uuid::parse_str(&id).map_err(ApiError::internal)?,
        owner_id: Uuid::parse_str(&owner_id).map_err(ApiError::internal)?,
        name: row.get("name"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        llm_provider: row.get("llm_provider"),
        llm_config,
        retention_days: row.get("retention_days"),
        rate_limit_per_minute: row.get("rate_limit_per_minute"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at")),
    })
}
