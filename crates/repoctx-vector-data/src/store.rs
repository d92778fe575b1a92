//! Context store trait and the records it persists

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repoctx_chunking::Chunk;
use repoctx_common::CorrelationId;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a processed context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ContextStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Who a context belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOwner {
    pub repo_id: String,
    pub user_id: String,
}

impl ContextOwner {
    pub fn new(repo_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// A chunk together with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Full replacement set for one context
#[derive(Debug, Clone)]
pub struct ReplaceContext {
    pub owner: ContextOwner,
    pub commit_sha: Option<String>,
    pub file_count: usize,
    /// Dimension every embedding must have
    pub dimension: usize,
    pub records: Vec<ChunkRecord>,
}

impl ReplaceContext {
    /// Reject the replace before anything is written
    ///
    /// # Errors
    /// `InvalidRecord` for a zero dimension, `DimensionMismatch` for the first
    /// record whose vector has a different length
    pub fn validate(&self) -> StoreResult<()> {
        if self.dimension == 0 {
            return Err(StoreError::InvalidRecord(
                "embedding dimension must be positive".to_string(),
            ));
        }

        if let Some(bad) = self
            .records
            .iter()
            .find(|record| record.embedding.len() != self.dimension)
        {
            return Err(StoreError::DimensionMismatch {
                source_path: bad.chunk.source_path.clone(),
                expected: self.dimension,
                actual: bad.embedding.len(),
            });
        }
        Ok(())
    }
}

/// Stored bookkeeping for one context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextState {
    pub context_id: String,
    pub repo_id: String,
    pub user_id: String,
    pub status: ContextStatus,
    pub commit_sha: Option<String>,
    pub chunk_count: usize,
    pub file_count: usize,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for processed contexts
///
/// Readers of a context see either the complete previous record set or the
/// complete new one; `replace_context` never exposes a mixture.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Atomically replace every chunk of `context_id` and mark it completed
    ///
    /// Returns the number of records written.
    async fn replace_context(
        &self,
        context_id: &str,
        replace: ReplaceContext,
        correlation_id: &CorrelationId,
    ) -> StoreResult<usize>;

    /// Repository ids the user already has contexts for
    async fn job_auth_scope(&self, user_id: &str) -> StoreResult<HashSet<String>>;

    async fn context_state(&self, context_id: &str) -> StoreResult<Option<ContextState>>;

    /// Record a status transition, creating the context row if needed
    async fn mark_context_status(
        &self,
        context_id: &str,
        owner: &ContextOwner,
        status: ContextStatus,
        error: Option<&str>,
        correlation_id: &CorrelationId,
    ) -> StoreResult<()>;

    /// Content hashes of the stored chunks, ordered by path then sequence
    async fn chunk_hashes(&self, context_id: &str) -> StoreResult<Vec<String>>;
}
