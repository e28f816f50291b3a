//! Embedding providers and the failover orchestrator.
//!
//! Each provider turns a batch of texts into fixed-dimension vectors. The
//! orchestrator batches inputs, prefers one provider, and on a provider-level
//! failure retries the whole call with the alternate — a single successful
//! call never mixes vectors from two providers.

mod gemini;
mod openai;

pub use gemini::GeminiEmbeddings;
pub use openai::OpenAiEmbeddings;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::config::{ProviderKind, Settings};
use crate::core::errors::ApiError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// One vector per input text, each exactly the configured dimension.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}

/// Provider-preferred, failover-on-error, batch-sized dispatch.
pub struct EmbeddingService {
    openai: Arc<dyn EmbeddingProvider>,
    gemini: Arc<dyn EmbeddingProvider>,
    preferred: ProviderKind,
    batch_size: usize,
    pub dimension: usize,
}

impl EmbeddingService {
    pub fn from_settings(settings: &Settings) -> Self {
        let openai: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddings::new(
            settings.openai_api_key.clone(),
            settings.openai_embedding_model.clone(),
            settings.embedding_dimension,
            settings.timeouts.embedding,
        ));
        let gemini: Arc<dyn EmbeddingProvider> = Arc::new(GeminiEmbeddings::new(
            settings.gemini_api_key.clone(),
            settings.gemini_embedding_model.clone(),
            settings.embedding_dimension,
            settings.timeouts.embedding,
        ));
        Self {
            openai,
            gemini,
            preferred: settings.embedding_preferred,
            batch_size: settings.embedding_batch_size.max(1),
            dimension: settings.embedding_dimension,
        }
    }

    /// Test seam: inject providers directly.
    pub fn with_providers(
        openai: Arc<dyn EmbeddingProvider>,
        gemini: Arc<dyn EmbeddingProvider>,
        preferred: ProviderKind,
        batch_size: usize,
        dimension: usize,
    ) -> Self {
        Self {
            openai,
            gemini,
            preferred,
            batch_size: batch_size.max(1),
            dimension,
        }
    }

    fn provider(&self, kind: ProviderKind) -> &Arc<dyn EmbeddingProvider> {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    /// Embed all texts in input order. Returns the vectors and the name of
    /// the provider that produced them.
    pub async fn embed_all(
        &self,
        texts: &[String],
        preferred: Option<ProviderKind>,
    ) -> Result<(Vec<Vec<f32>>, &'static str), ApiError> {
        if texts.is_empty() {
            return Ok((Vec::new(), self.provider(self.preferred).name()));
        }

        let first = preferred.unwrap_or(self.preferred);
        match self.embed_with(first, texts).await {
            Ok(vectors) => Ok((vectors, self.provider(first).name())),
            Err((batch_index, cause)) if is_failover_worthy(&cause) => {
                warn!(
                    "embedding provider {} failed on batch {} ({}); trying {}",
                    self.provider(first).name(),
                    batch_index,
                    cause,
                    self.provider(first.other()).name()
                );
                let second = first.other();
                match self.embed_with(second, texts).await {
                    Ok(vectors) => Ok((vectors, self.provider(second).name())),
                    Err((batch_index, cause)) => Err(ApiError::EmbeddingFailed {
                        batch_index,
                        cause: cause.to_string(),
                    }),
                }
            }
            Err((batch_index, cause)) => Err(ApiError::EmbeddingFailed {
                batch_index,
                cause: cause.to_string(),
            }),
        }
    }

    /// Single query vector.
    pub async fn embed_query(
        &self,
        text: &str,
        preferred: Option<ProviderKind>,
    ) -> Result<Vec<f32>, ApiError> {
        let texts = [text.to_string()];
        let (mut vectors, provider) = self.embed_all(&texts, preferred).await?;
        debug!("query embedded via {}", provider);
        vectors
            .pop()
            .ok_or_else(|| ApiError::Internal("provider returned no vectors".to_string()))
    }

    async fn embed_with(
        &self,
        kind: ProviderKind,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, (usize, ApiError)> {
        let provider = self.provider(kind);
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = provider
                .embed(batch)
                .await
                .map_err(|e| (batch_index, e))?;
            if batch_vectors.len() != batch.len() {
                return Err((
                    batch_index,
                    ApiError::ProviderRejected(format!(
                        "{} returned {} vectors for {} inputs",
                        provider.name(),
                        batch_vectors.len(),
                        batch.len()
                    )),
                ));
            }
            for vector in &batch_vectors {
                if vector.len() != self.dimension {
                    return Err((
                        batch_index,
                        ApiError::DimensionMismatch {
                            expected: self.dimension,
                            got: vector.len(),
                        },
                    ));
                }
            }
            debug!(
                "embedded batch {} ({} texts) via {}",
                batch_index,
                batch.len(),
                provider.name()
            );
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }
}

fn is_failover_worthy(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::ProviderUnavailable(_)
            | ApiError::ProviderRejected(_)
            | ApiError::DimensionMismatch { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        name: &'static str,
        dimension: usize,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FixedProvider {
        fn new(name: &'static str, dimension: usize, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                dimension,
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ApiError::ProviderUnavailable("down".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }
    }

    fn service(
        openai: Arc<FixedProvider>,
        gemini: Arc<FixedProvider>,
        batch_size: usize,
    ) -> EmbeddingService {
        EmbeddingService::with_providers(openai, gemini, ProviderKind::OpenAi, batch_size, 4)
    }

    #[tokio::test]
    async fn preferred_provider_handles_all_batches() {
        let openai = FixedProvider::new("openai", 4, false);
        let gemini = FixedProvider::new("gemini", 4, false);
        let svc = service(openai.clone(), gemini.clone(), 2);

        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let (vectors, provider) = svc.embed_all(&texts, None).await.unwrap();

        assert_eq!(provider, "openai");
        assert_eq!(vectors.len(), 5);
        assert_eq!(openai.calls.load(Ordering::SeqCst), 3);
        assert_eq!(gemini.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failover_reruns_the_whole_call_on_the_alternate() {
        let openai = FixedProvider::new("openai", 4, true);
        let gemini = FixedProvider::new("gemini", 4, false);
        let svc = service(openai, gemini.clone(), 2);

        let texts: Vec<String> = (0..4).map(|i| format!("text {}", i)).collect();
        let (vectors, provider) = svc.embed_all(&texts, None).await.unwrap();

        assert_eq!(provider, "gemini");
        assert_eq!(vectors.len(), 4);
        assert_eq!(gemini.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn both_providers_down_is_embedding_failed() {
        let openai = FixedProvider::new("openai", 4, true);
        let gemini = FixedProvider::new("gemini", 4, true);
        let svc = service(openai, gemini, 2);

        let err = svc
            .embed_all(&["a".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmbeddingFailed { batch_index: 0, .. }));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let openai = FixedProvider::new("openai", 3, false); // service expects 4
        let gemini = FixedProvider::new("gemini", 3, false);
        let svc = service(openai, gemini, 8);

        let err = svc
            .embed_all(&["a".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmbeddingFailed { .. }));
    }

    #[tokio::test]
    async fn embed_query_returns_one_vector() {
        let openai = FixedProvider::new("openai", 4, false);
        let gemini = FixedProvider::new("gemini", 4, false);
        let svc = service(openai, gemini, 8);

        let vector = svc.embed_query("hello", None).await.unwrap();
        assert_eq!(vector.len(), 4);
    }
}
