//! In-memory `ContextStore` for tests and single-process runs
//!
//! Replacement swaps the whole record vector under one lock, which gives the
//! same all-or-nothing visibility as the database transaction.

use crate::error::{StoreError, StoreResult};
use crate::store::{
    ChunkRecord, ContextOwner, ContextState, ContextStatus, ContextStore, ReplaceContext,
};
use async_trait::async_trait;
use chrono::Utc;
use repoctx_common::CorrelationId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct StoredContext {
    state: ContextState,
    records: Vec<ChunkRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    contexts: HashMap<String, StoredContext>,
    status_history: Vec<(String, ContextStatus)>,
    correlation_ids: Vec<CorrelationId>,
}

/// Mock storage backend for testing
#[derive(Clone, Default)]
pub struct MockContextStore {
    inner: Arc<Mutex<Inner>>,
    replace_calls: Arc<AtomicUsize>,
    fail_on_store: bool,
    fail_on_status: bool,
    fail_on_state: bool,
}

impl MockContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure `replace_context` to fail with a retryable error
    #[must_use]
    pub const fn with_store_failure(mut self) -> Self {
        self.fail_on_store = true;
        self
    }

    /// Configure `mark_context_status` to fail
    #[must_use]
    pub const fn with_status_failure(mut self) -> Self {
        self.fail_on_status = true;
        self
    }

    /// Configure `context_state` to fail with a retryable error
    #[must_use]
    pub const fn with_state_failure(mut self) -> Self {
        self.fail_on_state = true;
        self
    }

    /// Seed a context as if an earlier run had completed it
    #[must_use]
    pub fn with_completed_context(
        self,
        context_id: &str,
        owner: &ContextOwner,
        commit_sha: &str,
        chunk_count: usize,
    ) -> Self {
        self.lock().contexts.insert(
            context_id.to_string(),
            StoredContext {
                state: ContextState {
                    context_id: context_id.to_string(),
                    repo_id: owner.repo_id.clone(),
                    user_id: owner.user_id.clone(),
                    status: ContextStatus::Completed,
                    commit_sha: Some(commit_sha.to_string()),
                    chunk_count,
                    file_count: 0,
                    last_error: None,
                    updated_at: Utc::now(),
                },
                records: Vec::new(),
            },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored records for a context (for test assertions)
    pub fn records(&self, context_id: &str) -> Vec<ChunkRecord> {
        self.lock()
            .contexts
            .get(context_id)
            .map(|stored| stored.records.clone())
            .unwrap_or_default()
    }

    /// Every status a context has been marked with, in order
    pub fn status_history(&self, context_id: &str) -> Vec<ContextStatus> {
        self.lock()
            .status_history
            .iter()
            .filter(|(id, _)| id == context_id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    /// Get the most recent correlation ID used (for tracing verification)
    pub fn last_correlation_id(&self) -> Option<CorrelationId> {
        self.lock().correlation_ids.last().cloned()
    }

    fn owned_by(state: &ContextState, owner: &ContextOwner) -> bool {
        state.user_id == owner.user_id && state.repo_id == owner.repo_id
    }

    fn new_state(context_id: &str, owner: &ContextOwner, status: ContextStatus) -> ContextState {
        ContextState {
            context_id: context_id.to_string(),
            repo_id: owner.repo_id.clone(),
            user_id: owner.user_id.clone(),
            status,
            commit_sha: None,
            chunk_count: 0,
            file_count: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ContextStore for MockContextStore {
    async fn replace_context(
        &self,
        context_id: &str,
        replace: ReplaceContext,
        correlation_id: &CorrelationId,
    ) -> StoreResult<usize> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_store {
            return Err(StoreError::Unavailable(
                "Mock storage configured to fail".into(),
            ));
        }
        replace.validate()?;

        let written = replace.records.len();
        let mut inner = self.lock();
        let mut state = match inner.contexts.get(context_id) {
            Some(stored) if !Self::owned_by(&stored.state, &replace.owner) => {
                return Err(StoreError::OwnerMismatch {
                    context_id: context_id.to_string(),
                });
            }
            Some(stored) => stored.state.clone(),
            None => Self::new_state(context_id, &replace.owner, ContextStatus::Completed),
        };
        state.status = ContextStatus::Completed;
        state.commit_sha = replace.commit_sha;
        state.chunk_count = written;
        state.file_count = replace.file_count;
        state.last_error = None;
        state.updated_at = Utc::now();

        inner.contexts.insert(
            context_id.to_string(),
            StoredContext {
                state,
                records: replace.records,
            },
        );
        inner
            .status_history
            .push((context_id.to_string(), ContextStatus::Completed));
        inner.correlation_ids.push(correlation_id.clone());
        Ok(written)
    }

    async fn job_auth_scope(&self, user_id: &str) -> StoreResult<HashSet<String>> {
        Ok(self
            .lock()
            .contexts
            .values()
            .filter(|stored| stored.state.user_id == user_id)
            .map(|stored| stored.state.repo_id.clone())
            .collect())
    }

    async fn context_state(&self, context_id: &str) -> StoreResult<Option<ContextState>> {
        if self.fail_on_state {
            return Err(StoreError::Unavailable(
                "Mock state lookup configured to fail".into(),
            ));
        }
        Ok(self
            .lock()
            .contexts
            .get(context_id)
            .map(|stored| stored.state.clone()))
    }

    async fn mark_context_status(
        &self,
        context_id: &str,
        owner: &ContextOwner,
        status: ContextStatus,
        error: Option<&str>,
        correlation_id: &CorrelationId,
    ) -> StoreResult<()> {
        if self.fail_on_status {
            return Err(StoreError::Unavailable(
                "Mock status update configured to fail".into(),
            ));
        }

        let mut inner = self.lock();
        let stored = inner
            .contexts
            .entry(context_id.to_string())
            .or_insert_with(|| StoredContext {
                state: Self::new_state(context_id, owner, status),
                records: Vec::new(),
            });
        if !Self::owned_by(&stored.state, owner) {
            return Err(StoreError::OwnerMismatch {
                context_id: context_id.to_string(),
            });
        }
        stored.state.status = status;
        stored.state.last_error = error.map(str::to_string);
        stored.state.updated_at = Utc::now();

        inner.status_history.push((context_id.to_string(), status));
        inner.correlation_ids.push(correlation_id.clone());
        Ok(())
    }

    async fn chunk_hashes(&self, context_id: &str) -> StoreResult<Vec<String>> {
        let mut records = self.records(context_id);
        records.sort_by(|a, b| {
            a.chunk
                .source_path
                .cmp(&b.chunk.source_path)
                .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
        });
        Ok(records
            .into_iter()
            .map(|record| record.chunk.content_hash)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use repoctx_chunking::Chunker;

    fn owner() -> ContextOwner {
        ContextOwner::new("acme/widgets", "user-1")
    }

    fn replace_for(content: &str, dimension: usize) -> ReplaceContext {
        let records = Chunker::new(16, 4)
            .unwrap()
            .split(content, "README.md")
            .map(|chunk| ChunkRecord {
                chunk,
                embedding: vec![0.25; dimension],
            })
            .collect();
        ReplaceContext {
            owner: owner(),
            commit_sha: Some("abc123".to_string()),
            file_count: 1,
            dimension,
            records,
        }
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_record_set() {
        let store = MockContextStore::new();
        let cid = CorrelationId::new();

        let first = store
            .replace_context("ctx", replace_for("alpha beta gamma delta epsilon zeta", 4), &cid)
            .await
            .unwrap();
        let second = store
            .replace_context("ctx", replace_for("short", 4), &cid)
            .await
            .unwrap();

        assert!(first > second);
        assert_eq!(store.records("ctx").len(), second);
        let state = store.context_state("ctx").await.unwrap().unwrap();
        assert_eq!(state.status, ContextStatus::Completed);
        assert_eq!(state.chunk_count, second);
        assert_eq!(store.last_correlation_id(), Some(cid));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_leaves_previous_set() {
        let store = MockContextStore::new();
        let cid = CorrelationId::new();
        store
            .replace_context("ctx", replace_for("keep me around", 4), &cid)
            .await
            .unwrap();
        let before = store.chunk_hashes("ctx").await.unwrap();

        let mut bad = replace_for("replacement text", 4);
        bad.records[0].embedding.pop();
        let error = store.replace_context("ctx", bad, &cid).await.unwrap_err();

        assert!(matches!(error, StoreError::DimensionMismatch { .. }));
        assert_eq!(store.chunk_hashes("ctx").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let store = MockContextStore::new().with_store_failure();
        let error = store
            .replace_context("ctx", replace_for("text", 4), &CorrelationId::new())
            .await
            .unwrap_err();
        assert!(error.is_retryable());
        assert!(store.records("ctx").is_empty());
        assert_eq!(store.replace_calls(), 1);
    }

    #[tokio::test]
    async fn test_foreign_context_is_never_overwritten() {
        let theirs = ContextOwner::new("acme/widgets", "someone-else");
        let store = MockContextStore::new().with_completed_context("ctx", &theirs, "abc", 3);
        let cid = CorrelationId::new();

        let error = store
            .replace_context("ctx", replace_for("takeover", 4), &cid)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::OwnerMismatch { .. }));
        assert!(!error.is_retryable());

        let error = store
            .mark_context_status("ctx", &owner(), ContextStatus::Failed, None, &cid)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::OwnerMismatch { .. }));

        let state = store.context_state("ctx").await.unwrap().unwrap();
        assert_eq!(state.user_id, "someone-else");
        assert_eq!(state.status, ContextStatus::Completed);
        assert_eq!(state.chunk_count, 3);
    }

    #[tokio::test]
    async fn test_status_history_and_auth_scope() {
        let store = MockContextStore::new();
        let cid = CorrelationId::new();
        store
            .mark_context_status("ctx", &owner(), ContextStatus::Processing, None, &cid)
            .await
            .unwrap();
        store
            .mark_context_status("ctx", &owner(), ContextStatus::Failed, Some("boom"), &cid)
            .await
            .unwrap();

        assert_eq!(
            store.status_history("ctx"),
            vec![ContextStatus::Processing, ContextStatus::Failed]
        );
        let state = store.context_state("ctx").await.unwrap().unwrap();
        assert_eq!(state.last_error.as_deref(), Some("boom"));

        let scope = store.job_auth_scope("user-1").await.unwrap();
        assert!(scope.contains("acme/widgets"));
        assert!(store.job_auth_scope("someone-else").await.unwrap().is_empty());
    }
}
