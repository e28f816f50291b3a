use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::core::auth::{AuthVerifier, RemoteAuthVerifier, StaticAuthVerifier};
use crate::core::config::{AppPaths, Settings};
use crate::core::errors::ApiError;
use crate::crawl::{CrawlConfig, Crawler};
use crate::embed::EmbeddingService;
use crate::ingest::{IngestDeps, IngestScheduler};
use crate::llm::LlmService;
use crate::rag::QueryEngine;
use crate::store::{Database, ObjectStore};

/// Global application state shared across all routes and background tasks.
///
/// Provider clients, the database pool, the object store and the ingestion
/// scheduler are process-lifetime singletons built here; everything
/// request-scoped (acting user, bot, token scope) flows through handler
/// arguments instead.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub paths: Arc<AppPaths>,
    pub db: Database,
    pub objects: ObjectStore,
    pub engine: Arc<QueryEngine>,
    pub ingest: IngestScheduler,
    pub auth: Arc<dyn AuthVerifier>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, ApiError> {
        let settings = Settings::from_env();
        let paths = Arc::new(AppPaths::new());

        // Pool sized for the concurrency ceiling: capped ingestions plus a
        // query allowance.
        let pool_size = (settings.ingest_concurrency + 8) as u32;
        let db = Database::open(&paths.db_path, pool_size).await?;
        let objects = ObjectStore::new(paths.objects_dir.clone());

        let embeddings = Arc::new(EmbeddingService::from_settings(&settings));
        let llm = Arc::new(LlmService::from_settings(&settings));

        let crawler = Arc::new(Crawler::new(CrawlConfig {
            user_agent: settings.crawler_user_agent.clone(),
            timeout: settings.timeouts.crawler,
            min_content_chars: settings.crawler_min_content_chars,
            render_threshold_chars: settings.crawler_render_threshold_chars,
        })?);

        let engine = Arc::new(QueryEngine::new(
            db.clone(),
            embeddings.clone(),
            llm,
            settings.default_top_k,
            settings.default_min_score,
            settings.model_context_window,
        ));

        let ingest = IngestScheduler::new(
            Arc::new(IngestDeps {
                db: db.clone(),
                objects: objects.clone(),
                embeddings,
                crawler,
                timeouts: settings.timeouts,
            }),
            settings.ingest_concurrency,
        );

        let auth = build_auth_verifier(&settings);

        spawn_maintenance(db.clone());

        Ok(Arc::new(AppState {
            settings,
            paths,
            db,
            objects,
            engine,
            ingest,
            auth,
        }))
    }
}

fn build_auth_verifier(settings: &Settings) -> Arc<dyn AuthVerifier> {
    if let Some(url) = &settings.auth_userinfo_url {
        return Arc::new(RemoteAuthVerifier::new(
            url.clone(),
            Duration::from_secs(10),
        ));
    }

    // No identity provider configured: accept only the fixed tokens from
    // DEV_AUTH_TOKENS ("token=user-uuid", comma-separated).
    let tokens: HashMap<String, Uuid> = std::env::var("DEV_AUTH_TOKENS")
        .map(|raw| {
            raw.split(',')
                .filter_map(|pair| {
                    let (token, user) = pair.split_once('=')?;
                    Some((token.trim().to_string(), Uuid::parse_str(user.trim()).ok()?))
                })
                .collect()
        })
        .unwrap_or_default();
    if tokens.is_empty() {
        tracing::warn!("no AUTH_USERINFO_URL and no DEV_AUTH_TOKENS; all user auth will fail");
    }
    Arc::new(StaticAuthVerifier::new(tokens))
}

/// Hourly sweep: drop stale rate-counter windows and purge query logs past
/// each bot's retention.
fn spawn_maintenance(db: Database) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match db.cleanup_rate_counters().await {
                Ok(swept) if swept > 0 => {
                    tracing::debug!("swept {} rate counter windows", swept)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("rate counter sweep failed: {}", e),
            }
            match db.purge_expired_query_logs().await {
                Ok(purged) if purged > 0 => {
                    tracing::info!("purged {} expired query logs", purged)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("query log purge failed: {}", e),
            }
        }
    });
}
