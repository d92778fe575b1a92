//! Deterministic in-process embedding provider for tests
//!
//! Vectors are derived from a SHA-256 of the text, so the same text always
//! embeds to the same vector and re-processing is reproducible.

use crate::traits::EmbeddingProvider;
use crate::{EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock provider with injectable failures
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    returned_dimension: usize,
    always_fail: bool,
    fail_first: usize,
    calls: Arc<AtomicUsize>,
    texts_seen: Arc<AtomicUsize>,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            returned_dimension: dimension,
            always_fail: false,
            fail_first: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            texts_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails with a retryable 503
    #[must_use]
    pub const fn with_failure(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// The first `count` calls fail with a retryable 503
    #[must_use]
    pub const fn failing_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    /// Return vectors of `dimension` while still advertising the configured one
    #[must_use]
    pub const fn returning_dimension(mut self, dimension: usize) -> Self {
        self.returned_dimension = dimension;
        self
    }

    /// Number of `embed_batch` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded successfully so far
    pub fn texts_embedded(&self) -> usize {
        self.texts_seen.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.returned_dimension)
            .map(|i| {
                let byte = digest.get(i % digest.len()).copied().unwrap_or_default();
                f32::from(byte) / 255.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || call < self.fail_first {
            return Err(EmbeddingError::Http {
                status: 503,
                body: "Mock embedding failure".to_string(),
            });
        }

        self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding-model"
    }
}
