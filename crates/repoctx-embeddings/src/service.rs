//! Default embedding service: batching, bounded retries and stats

use crate::traits::{EmbeddingProvider, EmbeddingService, EmbeddingStats};
use crate::{EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use repoctx_common::Backoff;
use repoctx_config::EmbeddingConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default implementation of `EmbeddingService`
///
/// Texts are sent in batches of at most `batch_size`. A batch that fails
/// with a retryable error is attempted up to `max_attempts` times in total,
/// sleeping `backoff.delay_for(n)` between attempts. Every returned vector
/// is checked against the provider's advertised dimension.
pub struct DefaultEmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    stats: Arc<RwLock<EmbeddingStats>>,
    batch_size: usize,
    max_attempts: u32,
    backoff: Backoff,
}

impl DefaultEmbeddingService {
    /// Create with a custom provider and the default retry policy
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        let defaults = EmbeddingConfig::default();
        let stats = Arc::new(RwLock::new(EmbeddingStats {
            model_name: provider.model_name().to_string(),
            embedding_dimension: provider.embedding_dimension(),
            ..Default::default()
        }));

        Self {
            provider,
            stats,
            batch_size: batch_size.max(1),
            max_attempts: defaults.max_retries.max(1),
            backoff: defaults.retry_backoff(),
        }
    }

    /// Create with batch size and retry policy taken from configuration
    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::with_provider(provider, config.batch_size)
            .with_retry(config.max_retries, config.retry_backoff())
    }

    /// Override the per-batch retry policy
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, backoff: Backoff) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    async fn embed_with_retry(
        &self,
        batch_index: usize,
        batch: &[&str],
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut attempt = 1u32;
        loop {
            let result = self.provider.embed_batch(batch).await;
            let error = match result.and_then(|vectors| self.check_vectors(batch, vectors)) {
                Ok(vectors) => return Ok(vectors),
                Err(error) => error,
            };

            if !error.is_retryable() {
                self.stats.write().await.failed_batches += 1;
                return Err(error);
            }
            if attempt >= self.max_attempts {
                self.stats.write().await.failed_batches += 1;
                return Err(EmbeddingError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.backoff.delay_for(attempt);
            tracing::warn!(
                batch_index,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Embedding batch failed, retrying"
            );
            self.stats.write().await.retried_batches += 1;
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    fn check_vectors(
        &self,
        batch: &[&str],
        vectors: Vec<Vec<f32>>,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }

        let expected = self.provider.embedding_dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }

    async fn record_batch(&self, batch_len: usize, elapsed: Duration) {
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ms = elapsed.as_millis() as f64;
        let mut stats = self.stats.write().await;
        stats.total_embeddings += batch_len;
        stats.total_batches += 1;

        // Update running average
        let prev_avg = stats.avg_batch_time_ms;
        #[allow(clippy::cast_precision_loss)]
        let count = stats.total_batches as f64;
        stats.avg_batch_time_ms = prev_avg.mul_add(count - 1.0, elapsed_ms) / count;
    }
}

#[async_trait]
impl EmbeddingService for DefaultEmbeddingService {
    async fn generate_embeddings(&self, texts: Vec<&str>) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let start = Instant::now();
            let embeddings = self.embed_with_retry(batch_index, batch).await?;
            all_embeddings.extend(embeddings);
            self.record_batch(batch.len(), start.elapsed()).await;
        }

        Ok(all_embeddings)
    }

    fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    async fn get_stats(&self) -> EmbeddingStats {
        self.stats.read().await.clone()
    }
}
