//! Embedding provider and service contracts
//!
//! Providers turn one batch of texts into vectors; the service layers
//! batching, retries and statistics on top of a provider.

use crate::EmbeddingResult;
use async_trait::async_trait;

/// One remote or local model that embeds a single batch per call
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning exactly one vector per input in input order
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Length of every vector this provider returns
    fn embedding_dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Batching front end used by the job processor
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed any number of texts, splitting them into provider-sized batches
    async fn generate_embeddings(&self, texts: Vec<&str>) -> EmbeddingResult<Vec<Vec<f32>>>;

    fn provider(&self) -> &dyn EmbeddingProvider;

    async fn get_stats(&self) -> EmbeddingStats;
}

/// Running totals kept by an [`EmbeddingService`]
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStats {
    pub total_embeddings: usize,

    /// Batches that eventually succeeded
    pub total_batches: usize,

    /// Batch attempts that failed and were retried
    pub retried_batches: usize,

    /// Batches that failed for good
    pub failed_batches: usize,

    /// Mean wall time of a successful batch, in milliseconds
    pub avg_batch_time_ms: f64,

    pub model_name: String,
    pub embedding_dimension: usize,
}
