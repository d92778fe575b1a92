//! Integration tests for the PostgreSQL context store
//!
//! Requires `DATABASE_URL` pointing at a disposable database; skipped otherwise.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use repoctx_chunking::Chunker;
use repoctx_common::CorrelationId;
use repoctx_data::run_migrations;
use repoctx_vector_data::{
    ChunkRecord, ContextOwner, ContextStatus, ContextStore, PostgresContextStore, ReplaceContext,
    StoreError,
};
use sqlx::PgPool;
use tokio::sync::Mutex;

static DB_LOCK: Mutex<()> = Mutex::const_new(());

async fn test_store() -> Option<PostgresContextStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };
    let pool = PgPool::connect(&url).await.expect("connect to test database");
    run_migrations(&pool).await.expect("run migrations");

    sqlx::query("TRUNCATE contexts CASCADE")
        .execute(&pool)
        .await
        .expect("truncate context tables");

    Some(PostgresContextStore::new(pool))
}

fn replace_for(files: &[(&str, &str)], dimension: usize, commit: &str) -> ReplaceContext {
    let chunker = Chunker::new(32, 8).unwrap();
    let records = files
        .iter()
        .flat_map(|(path, content)| chunker.split(content, path).collect::<Vec<_>>())
        .map(|chunk| ChunkRecord {
            chunk,
            embedding: vec![0.125; dimension],
        })
        .collect();

    ReplaceContext {
        owner: ContextOwner::new("acme/widgets", "user-1"),
        commit_sha: Some(commit.to_string()),
        file_count: files.len(),
        dimension,
        records,
    }
}

#[tokio::test]
async fn test_replace_is_wholesale_and_reprocessing_is_stable() {
    let _guard = DB_LOCK.lock().await;
    let Some(store) = test_store().await else {
        return;
    };
    let cid = CorrelationId::new();
    let files = [
        ("src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n"),
        ("README.md", "# Widgets\n\nA small crate that adds numbers together.\n"),
    ];

    let written = store
        .replace_context("ctx-1", replace_for(&files, 4, "c1"), &cid)
        .await
        .unwrap();
    let first = store.chunk_hashes("ctx-1").await.unwrap();
    assert_eq!(first.len(), written);

    store
        .replace_context("ctx-1", replace_for(&files, 4, "c1"), &cid)
        .await
        .unwrap();
    assert_eq!(store.chunk_hashes("ctx-1").await.unwrap(), first);

    store
        .replace_context("ctx-1", replace_for(&files[..1], 4, "c2"), &cid)
        .await
        .unwrap();
    let state = store.context_state("ctx-1").await.unwrap().unwrap();
    assert_eq!(state.status, ContextStatus::Completed);
    assert_eq!(state.commit_sha.as_deref(), Some("c2"));
    assert_eq!(state.file_count, 1);
    assert_eq!(
        state.chunk_count,
        store.chunk_hashes("ctx-1").await.unwrap().len()
    );
    assert!(state.chunk_count < first.len());

    let scope = store.job_auth_scope("user-1").await.unwrap();
    assert!(scope.contains("acme/widgets"));
}

#[tokio::test]
async fn test_rejected_replace_keeps_previous_rows() {
    let _guard = DB_LOCK.lock().await;
    let Some(store) = test_store().await else {
        return;
    };
    let cid = CorrelationId::new();
    let files = [("main.py", "print('hello')\n")];

    store
        .replace_context("ctx-2", replace_for(&files, 4, "c1"), &cid)
        .await
        .unwrap();
    let before = store.chunk_hashes("ctx-2").await.unwrap();

    let mut bad = replace_for(&[("other.py", "x = 1\n")], 4, "c2");
    bad.records[0].embedding.push(1.0);
    let error = store.replace_context("ctx-2", bad, &cid).await.unwrap_err();
    assert!(matches!(error, StoreError::DimensionMismatch { .. }));

    assert_eq!(store.chunk_hashes("ctx-2").await.unwrap(), before);
}

#[tokio::test]
async fn test_status_bookkeeping() {
    let _guard = DB_LOCK.lock().await;
    let Some(store) = test_store().await else {
        return;
    };
    let cid = CorrelationId::new();
    let owner = ContextOwner::new("acme/gadgets", "user-2");

    store
        .mark_context_status("ctx-3", &owner, ContextStatus::Processing, None, &cid)
        .await
        .unwrap();
    store
        .mark_context_status("ctx-3", &owner, ContextStatus::Failed, Some("fetch failed"), &cid)
        .await
        .unwrap();

    let state = store.context_state("ctx-3").await.unwrap().unwrap();
    assert_eq!(state.status, ContextStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("fetch failed"));
    assert!(store.chunk_hashes("ctx-3").await.unwrap().is_empty());
    assert!(store.context_state("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_foreign_owner_cannot_take_over_context() {
    let _guard = DB_LOCK.lock().await;
    let Some(store) = test_store().await else {
        return;
    };
    let cid = CorrelationId::new();
    let files = [("src/lib.rs", "pub fn owned() -> bool {\n    true\n}\n")];
    let written = store
        .replace_context("ctx-owned", replace_for(&files, 4, "c1"), &cid)
        .await
        .unwrap();

    let mut takeover = replace_for(&[("evil.rs", "fn evil() {}\n")], 4, "c2");
    takeover.owner = ContextOwner::new("acme/widgets", "intruder");
    let error = store
        .replace_context("ctx-owned", takeover, &cid)
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::OwnerMismatch { .. }));

    let intruder = ContextOwner::new("acme/widgets", "intruder");
    let error = store
        .mark_context_status("ctx-owned", &intruder, ContextStatus::Failed, None, &cid)
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::OwnerMismatch { .. }));

    let state = store.context_state("ctx-owned").await.unwrap().unwrap();
    assert_eq!(state.user_id, "user-1");
    assert_eq!(state.status, ContextStatus::Completed);
    assert_eq!(state.commit_sha.as_deref(), Some("c1"));
    assert_eq!(store.chunk_hashes("ctx-owned").await.unwrap().len(), written);
}
