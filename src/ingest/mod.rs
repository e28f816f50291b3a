//! Per-source ingestion: a background job walks one source through
//! `uploaded → parsing → indexed`, or parks it at `failed` with the error
//! message. Jobs run detached from the submitting request under a fixed
//! concurrency cap; within a job the steps are strictly sequential.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, ChunkConfig};
use crate::core::config::Timeouts;
use crate::core::errors::ApiError;
use crate::crawl::{fallback_heading_from_url, hex_sha256, Crawler};
use crate::embed::EmbeddingService;
use crate::parse::parser_for;
use crate::store::models::{Bot, Source, SourceStatus, SourceType};
use crate::store::sources::CrawlMeta;
use crate::store::{Database, ObjectStore};

pub struct IngestDeps {
    pub db: Database,
    pub objects: ObjectStore,
    pub embeddings: Arc<EmbeddingService>,
    pub crawler: Arc<Crawler>,
    pub timeouts: Timeouts,
}

#[derive(Clone)]
pub struct IngestScheduler {
    deps: Arc<IngestDeps>,
    permits: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl IngestScheduler {
    pub fn new(deps: Arc<IngestDeps>, concurrency: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            deps,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            shutdown,
        }
    }

    /// Enqueue a source for background ingestion. Accepts unboundedly; the
    /// semaphore caps how many jobs actually run at once.
    pub fn schedule(&self, bot: Bot, source: Source) {
        let deps = self.deps.clone();
        let permits = self.permits.clone();
        let mut shutdown = self.shutdown.subscribe();
        let source_id = source.id;

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            tokio::select! {
                result = run_job(&deps, &bot, &source) => {
                    if let Err(err) = result {
                        warn!("ingestion failed for source {}: {}", source_id, err);
                        let _ = deps
                            .db
                            .update_source_status(
                                source_id,
                                SourceStatus::Failed,
                                Some(&err.to_string()),
                            )
                            .await;
                    }
                }
                _ = shutdown.changed() => {
                    let _ = deps
                        .db
                        .update_source_status(
                            source_id,
                            SourceStatus::Failed,
                            Some(&ApiError::Cancelled.to_string()),
                        )
                        .await;
                }
            }
        });
    }

    /// Abort in-flight jobs; each marks its source failed with "cancelled".
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub(crate) async fn run_job(
    deps: &IngestDeps,
    bot: &Bot,
    source: &Source,
) -> Result<(), ApiError> {
    deps.db
        .update_source_status(source.id, SourceStatus::Parsing, None)
        .await?;
    info!("parsing source {} ({})", source.id, source.source_type.as_str());

    let (text, title, url_heading) = match source.source_type {
        SourceType::Html => {
            let url = source
                .original_url
                .as_deref()
                .ok_or_else(|| ApiError::validation("url source has no original_url"))?;
            let page = deps.crawler.fetch(url).await?;

            // Unchanged content on a re-ingest keeps its existing chunks.
            let unchanged = source.page_checksum.as_deref() == Some(page.checksum.as_str())
                && deps.db.count_chunks_for_source(source.id).await? > 0;

            deps.db
                .update_source_crawl_meta(
                    source.id,
                    &CrawlMeta {
                        canonical_url: Some(page.canonical_url.clone()),
                        etag: page.etag.clone(),
                        last_modified: page.last_modified.clone(),
                        page_checksum: Some(page.checksum.clone()),
                    },
                )
                .await?;

            if unchanged {
                debug!("source {} content unchanged; skipping re-chunk", source.id);
                deps.db
                    .update_source_status(source.id, SourceStatus::Indexed, None)
                    .await?;
                return Ok(());
            }

            let url_heading = fallback_heading_from_url(&page.canonical_url);
            (page.text, page.title, url_heading)
        }
        _ => {
            let bytes = timeout(
                deps.timeouts.object_store,
                deps.objects.get(&source.storage_path),
            )
            .await
            .map_err(|_| ApiError::ProviderUnavailable("object store timeout".to_string()))??;

            deps.db
                .set_source_checksum(source.id, &hex_sha256(&bytes))
                .await?;

            let parser = parser_for(source.source_type)?;
            let parsed = parser.parse(&bytes)?;
            debug!(
                "parsed source {}: {} chars (pages={:?}, paragraphs={:?}, encoding={:?})",
                source.id,
                parsed.text.len(),
                parsed.metadata.page_count,
                parsed.metadata.paragraph_count,
                parsed.metadata.encoding
            );
            (parsed.text, None, None)
        }
    };

    let config = ChunkConfig {
        model: bot.llm_config.model_name.clone(),
        ..Default::default()
    };
    let chunks = chunk_text(&text, title.as_deref(), url_heading.as_deref(), &config);
    if chunks.is_empty() {
        return Err(ApiError::EmptyContent);
    }
    info!("chunked source {} into {} chunks", source.id, chunks.len());

    let excerpts: Vec<String> = chunks.iter().map(|c| c.excerpt.clone()).collect();
    let (vectors, provider) = deps
        .embeddings
        .embed_all(&excerpts, Some(bot.provider_kind()))
        .await?;
    debug!(
        "embedded {} chunks for source {} via {}",
        vectors.len(),
        source.id,
        provider
    );

    // Replace, don't append: a re-ingest must not leave stale chunks behind,
    // and insertion is all-or-nothing so `indexed` implies full coverage.
    deps.db.delete_chunks_for_source(source.id).await?;
    deps.db
        .insert_chunks(bot.id, source.id, &chunks, &vectors)
        .await?;
    deps.db
        .update_source_status(source.id, SourceStatus::Indexed, None)
        .await?;
    info!(
        "source {} indexed ({} chunks, embeddings via {})",
        source.id,
        chunks.len(),
        provider
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::core::config::ProviderKind;
    use crate::crawl::CrawlConfig;
    use crate::embed::EmbeddingProvider;
    use crate::store::bots::NewBot;
    use crate::store::models::LlmConfig;
    use crate::store::sources::NewSource;
    use crate::store::test_support::test_db;

    struct UnitEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn name(&self) -> &'static str {
            "unit"
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            if self.fail {
                return Err(ApiError::ProviderUnavailable("down".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    async fn deps_with(fail_openai: bool, fail_gemini: bool) -> (Arc<IngestDeps>, tempfile::TempDir)
    {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let objects = ObjectStore::new(dir.path().to_path_buf());
        let embeddings = Arc::new(EmbeddingService::with_providers(
            Arc::new(UnitEmbedder { fail: fail_openai }),
            Arc::new(UnitEmbedder { fail: fail_gemini }),
            ProviderKind::OpenAi,
            64,
            3,
        ));
        let crawler = Arc::new(Crawler::new(CrawlConfig::default()).unwrap());
        (
            Arc::new(IngestDeps {
                db,
                objects,
                embeddings,
                crawler,
                timeouts: Timeouts::default(),
            }),
            dir,
        )
    }

    async fn seed_text_source(deps: &IngestDeps, body: &str) -> (Bot, Source) {
        let owner = Uuid::new_v4();
        let bot = deps
            .db
            .create_bot(
                owner,
                NewBot {
                    name: "b".into(),
                    description: None,
                    system_prompt: "sys".into(),
                    llm_provider: "openai".into(),
                    llm_config: LlmConfig::default(),
                    retention_days: 90,
                    rate_limit_per_minute: None,
                },
            )
            .await
            .unwrap();

        let source_id = Uuid::new_v4();
        let storage_path = ObjectStore::source_path(bot.id, source_id, "notes.txt");
        deps.objects.put(&storage_path, body.as_bytes()).await.unwrap();
        let source = deps
            .db
            .create_source(NewSource {
                id: source_id,
                bot_id: bot.id,
                source_type: SourceType::Text,
                original_url: None,
                canonical_url: None,
                storage_path,
                file_size: Some(body.len() as i64),
                mime_type: Some("text/plain".into()),
            })
            .await
            .unwrap();
        (bot, source)
    }

    #[tokio::test]
    async fn text_source_reaches_indexed_with_embedded_chunks() {
        let (deps, _dir) = deps_with(false, false).await;
        let (bot, source) =
            seed_text_source(&deps, &"Alpha. Beta. Gamma. ".repeat(400)).await;

        run_job(&deps, &bot, &source).await.unwrap();

        let after = deps.db.get_source(bot.id, source.id).await.unwrap();
        assert_eq!(after.status, SourceStatus::Indexed);
        assert!(after.page_checksum.is_some());

        let count = deps.db.count_chunks_for_source(source.id).await.unwrap();
        assert!((1..=50).contains(&count));

        // Every chunk got a vector or the insert would have aborted whole.
        let hits = deps
            .db
            .search_chunks(bot.id, &[1.0, 0.0, 0.0], 100, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len() as i64, count.min(100));
    }

    #[tokio::test]
    async fn preferred_provider_down_still_indexes_via_alternate() {
        let (deps, _dir) = deps_with(true, false).await;
        let (bot, source) =
            seed_text_source(&deps, &"Failover test sentence. ".repeat(50)).await;

        run_job(&deps, &bot, &source).await.unwrap();
        let after = deps.db.get_source(bot.id, source.id).await.unwrap();
        assert_eq!(after.status, SourceStatus::Indexed);
    }

    #[tokio::test]
    async fn both_providers_down_persists_no_chunks() {
        let (deps, _dir) = deps_with(true, true).await;
        let (bot, source) =
            seed_text_source(&deps, &"Doomed sentence. ".repeat(50)).await;

        let err = run_job(&deps, &bot, &source).await.unwrap_err();
        assert!(matches!(err, ApiError::EmbeddingFailed { .. }));
        assert_eq!(deps.db.count_chunks_for_source(source.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scheduler_marks_failures_on_the_row() {
        let (deps, _dir) = deps_with(false, false).await;
        // Source row points at an object that was never uploaded.
        let (bot, source) = {
            let (bot, mut source) = seed_text_source(&deps, "irrelevant").await;
            source.storage_path = "bots/none/sources/none/missing.txt".into();
            sqlx::query("UPDATE sources SET storage_path = ?1 WHERE id = ?2")
                .bind(&source.storage_path)
                .bind(source.id.to_string())
                .execute(deps.db.pool())
                .await
                .unwrap();
            (bot, source)
        };

        let scheduler = IngestScheduler::new(deps.clone(), 2);
        scheduler.schedule(bot.clone(), source.clone());

        // Background job: poll until it settles.
        for _ in 0..100 {
            let current = deps.db.get_source(bot.id, source.id).await.unwrap();
            if current.status == SourceStatus::Failed {
                assert!(current.error_message.unwrap().contains("not found"));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("source never reached failed status");
    }

    #[tokio::test]
    async fn empty_file_fails_with_empty_content() {
        let (deps, _dir) = deps_with(false, false).await;
        let (bot, source) = seed_text_source(&deps, "   \n  ").await;

        let err = run_job(&deps, &bot, &source).await.unwrap_err();
        assert!(matches!(err, ApiError::EmptyContent));
    }
}
