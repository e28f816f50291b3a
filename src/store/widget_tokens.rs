//! Widget tokens: opaque bearer credentials binding a public caller to one
//! bot. Plaintext is returned exactly once at creation; only the SHA-256
//! digest is stored. Validation checks hash, expiry and the domain
//! allow-list, then resolves to the token's bot id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::Row;
use url::Url;
use uuid::Uuid;

use super::models::WidgetToken;
use super::{parse_timestamp, parse_timestamp_opt, Database};
use crate::core::errors::ApiError;

/// Characters of plaintext kept for display in listings.
const PREFIX_LEN: usize = 8;
/// Random bytes behind each token (512 bits).
const TOKEN_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct NewWidgetToken {
    pub bot_id: Uuid,
    pub allowed_domains: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
}

/// Creation result: the stored record plus the one-time plaintext.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: WidgetToken,
    pub plaintext: String,
}

pub fn hash_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_plaintext() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Reduce an allow-list entry (bare host or URL) to a lowercase host.
fn entry_host(entry: &str) -> Option<String> {
    let entry = entry.trim().trim_end_matches('/');
    if entry.is_empty() {
        return None;
    }
    if entry.contains("://") {
        Url::parse(entry)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    } else {
        Some(entry.to_ascii_lowercase())
    }
}

fn origin_host(origin: &str) -> Option<String> {
    entry_host(origin)
}

/// Strict exact-host, case-insensitive match. Subdomains do not match.
pub fn domain_allowed(origin: &str, allowed_domains: &[String]) -> bool {
    let Some(origin) = origin_host(origin) else {
        return false;
    };
    allowed_domains
        .iter()
        .filter_map(|entry| entry_host(entry))
        .any(|host| host == origin)
}

impl Database {
    pub async fn create_widget_token(
        &self,
        new: NewWidgetToken,
    ) -> Result<IssuedToken, ApiError> {
        if new.allowed_domains.is_empty() {
            return Err(ApiError::validation("allowed_domains must not be empty"));
        }
        if let Some(expires_at) = new.expires_at {
            if expires_at <= Utc::now() {
                return Err(ApiError::validation("expires_at must be in the future"));
            }
        }

        let plaintext = generate_plaintext();
        let token_hash = hash_token(&plaintext);
        let token_prefix: String = plaintext.chars().take(PREFIX_LEN).collect();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let domains_json =
            serde_json::to_string(&new.allowed_domains).map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT INTO widget_tokens (id, bot_id, token_hash, token_prefix, allowed_domains,
                                        expires_at, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(id.to_string())
        .bind(new.bot_id.to_string())
        .bind(&token_hash)
        .bind(&token_prefix)
        .bind(&domains_json)
        .bind(new.expires_at.map(|t| t.to_rfc3339()))
        .bind(&new.name)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(IssuedToken {
            token: WidgetToken {
                id,
                bot_id: new.bot_id,
                token_hash,
                token_prefix: Some(token_prefix),
                allowed_domains: new.allowed_domains,
                expires_at: new.expires_at,
                name: new.name,
                last_used_at: None,
                created_at: now,
            },
            plaintext,
        })
    }

    pub async fn list_widget_tokens(&self, bot_id: Uuid) -> Result<Vec<WidgetToken>, ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM widget_tokens WHERE bot_id = ?1 ORDER BY created_at DESC",
        )
        .bind(bot_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_token).collect()
    }

    pub async fn delete_widget_token(
        &self,
        bot_id: Uuid,
        token_id: Uuid,
    ) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM widget_tokens WHERE id = ?1 AND bot_id = ?2")
            .bind(token_id.to_string())
            .bind(bot_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("widget token {}", token_id)));
        }
        Ok(())
    }

    /// Validate a presented bearer token and resolve it to its bot.
    pub async fn validate_widget_token(
        &self,
        plaintext: &str,
        origin: Option<&str>,
    ) -> Result<Uuid, ApiError> {
        let token_hash = hash_token(plaintext);
        let row = sqlx::query("SELECT * FROM widget_tokens WHERE token_hash = ?1")
            .bind(&token_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("widget token".to_string()))?;
        let token = row_to_token(&row)?;

        if let Some(expires_at) = token.expires_at {
            if Utc::now() >= expires_at {
                return Err(ApiError::Expired);
            }
        }

        let origin = origin.ok_or(ApiError::DomainNotAllowed)?;
        if !domain_allowed(origin, &token.allowed_domains) {
            return Err(ApiError::DomainNotAllowed);
        }

        // Best effort; a failed touch must not fail the query.
        if let Err(e) = self.touch_widget_token(token.id).await {
            tracing::debug!("failed to update last_used_at: {}", e);
        }

        Ok(token.bot_id)
    }

    async fn touch_widget_token(&self, token_id: Uuid) -> Result<(), ApiError> {
        sqlx::query("UPDATE widget_tokens SET last_used_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> Result<WidgetToken, ApiError> {
    let id: String = row.get("id");
    let bot_id: String = row.get("bot_id");
    let domains_json: String = row.get("allowed_domains");

    Ok(WidgetToken {
        id: Uuid::parse_str(&id).map_err(ApiError::internal)?,
        bot_id: Uuid::parse_str(&bot_id).map_err(ApiError::internal)?,
        token_hash: row.get("token_hash"),
        token_prefix: row.get("token_prefix"),
        allowed_domains: serde_json::from_str(&domains_json).unwrap_or_default(),
        expires_at: parse_timestamp_opt(row.get("expires_at")),
        name: row.get("name"),
        last_used_at: parse_timestamp_opt(row.get("last_used_at")),
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bots::tests::sample_bot;
    use crate::store::test_support::test_db;
    use chrono::Duration;

    fn token_for(bot_id: Uuid, domains: &[&str]) -> NewWidgetToken {
        NewWidgetToken {
            bot_id,
            allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
            expires_at: None,
            name: Some("site widget".to_string()),
        }
    }

    #[tokio::test]
    async fn issued_token_round_trips_and_never_stores_plaintext() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();

        let issued = db
            .create_widget_token(token_for(bot.id, &["example.com"]))
            .await
            .unwrap();

        assert_eq!(hash_token(&issued.plaintext), issued.token.token_hash);
        assert_eq!(
            issued.token.token_prefix.as_deref().unwrap(),
            &issued.plaintext[..8]
        );

        let stored: String = sqlx::query_scalar("SELECT token_hash FROM widget_tokens")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_ne!(stored, issued.plaintext);

        let bot_id = db
            .validate_widget_token(&issued.plaintext, Some("https://example.com"))
            .await
            .unwrap();
        assert_eq!(bot_id, bot.id);
    }

    #[tokio::test]
    async fn revoked_token_is_not_found() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();
        let issued = db
            .create_widget_token(token_for(bot.id, &["example.com"]))
            .await
            .unwrap();

        db.delete_widget_token(bot.id, issued.token.id).await.unwrap();
        assert!(matches!(
            db.validate_widget_token(&issued.plaintext, Some("https://example.com"))
                .await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_null_expiry_never_expires() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();

        assert!(matches!(
            db.create_widget_token(NewWidgetToken {
                expires_at: Some(Utc::now() - Duration::seconds(1)),
                ..token_for(bot.id, &["example.com"])
            })
            .await,
            Err(ApiError::ValidationFailed(_))
        ));

        let issued = db
            .create_widget_token(NewWidgetToken {
                expires_at: Some(Utc::now() + Duration::milliseconds(50)),
                ..token_for(bot.id, &["example.com"])
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(matches!(
            db.validate_widget_token(&issued.plaintext, Some("https://example.com"))
                .await,
            Err(ApiError::Expired)
        ));

        let forever = db
            .create_widget_token(token_for(bot.id, &["example.com"]))
            .await
            .unwrap();
        assert!(db
            .validate_widget_token(&forever.plaintext, Some("https://example.com"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn domain_guard_is_exact_host_case_insensitive() {
        assert!(domain_allowed(
            "https://Example.COM",
            &["example.com".to_string()]
        ));
        assert!(domain_allowed(
            "https://example.com",
            &["https://example.com/".to_string()]
        ));
        assert!(!domain_allowed(
            "https://evil.test",
            &["example.com".to_string()]
        ));
        assert!(!domain_allowed(
            "https://sub.example.com",
            &["example.com".to_string()]
        ));
    }

    #[tokio::test]
    async fn wrong_or_missing_origin_is_domain_not_allowed() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();
        let issued = db
            .create_widget_token(token_for(bot.id, &["example.com"]))
            .await
            .unwrap();

        assert!(matches!(
            db.validate_widget_token(&issued.plaintext, Some("https://evil.test"))
                .await,
            Err(ApiError::DomainNotAllowed)
        ));
        assert!(matches!(
            db.validate_widget_token(&issued.plaintext, None).await,
            Err(ApiError::DomainNotAllowed)
        ));
    }

    #[tokio::test]
    async fn empty_domain_list_is_invalid() {
        let db = test_db().await;
        let owner = Uuid::new_v4();
        let bot = db.create_bot(owner, sample_bot()).await.unwrap();
        assert!(matches!(
            db.create_widget_token(token_for(bot.id, &[])).await,
            Err(ApiError::ValidationFailed(_))
        ));
    }
}
