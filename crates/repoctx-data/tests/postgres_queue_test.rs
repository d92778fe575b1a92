//! Integration tests for the PostgreSQL-backed job queue
//!
//! Requires `DATABASE_URL` pointing at a disposable database; skipped otherwise.
//! The tests wipe `ingest_jobs` so they run one at a time behind a lock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use repoctx_data::{JobQueue, NewJob, PostgresJobQueue, QueueDepth, run_migrations};
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::Mutex;

static DB_LOCK: Mutex<()> = Mutex::const_new(());

async fn test_queue() -> Option<PostgresJobQueue> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres queue test");
        return None;
    };
    let pool = PgPool::connect(&url).await.expect("connect to test database");
    run_migrations(&pool).await.expect("run migrations");

    sqlx::query("TRUNCATE ingest_jobs, ingest_jobs_dead_letter")
        .execute(&pool)
        .await
        .expect("truncate queue tables");

    Some(PostgresJobQueue::new(pool).with_batch_size(2))
}

fn job(priority: i32) -> NewJob {
    NewJob::new(json!({
        "job_type": "process",
        "payload": { "context_id": "ctx", "relative_path": "acme/widgets" }
    }))
    .with_priority(priority)
}

#[tokio::test]
async fn test_claim_ack_cycle() {
    let _guard = DB_LOCK.lock().await;
    let Some(queue) = test_queue().await else {
        return;
    };

    let low = queue.enqueue(job(0)).await.unwrap();
    let high = queue.enqueue(job(10)).await.unwrap();

    let claimed = queue
        .claim("worker-a", 5, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].message_id, high);
    assert_eq!(claimed[1].message_id, low);
    assert!(claimed.iter().all(|job| job.attempt_count == 1));
    assert_eq!(claimed[0].job_type, "process");

    assert!(
        queue
            .claim("worker-b", 5, Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty()
    );

    for job in &claimed {
        queue.ack(job.job_id).await.unwrap();
    }
    assert!(queue.ack(claimed[0].job_id).await.unwrap_err().is_not_found());
    assert_eq!(queue.depth().await.unwrap(), QueueDepth::default());
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_with_new_delivery() {
    let _guard = DB_LOCK.lock().await;
    let Some(queue) = test_queue().await else {
        return;
    };

    queue.enqueue(job(0)).await.unwrap();
    let first = queue
        .claim("worker-a", 1, Duration::from_millis(200))
        .await
        .unwrap()
        .remove(0);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let second = queue
        .claim("worker-b", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(second.message_id, first.message_id);
    assert_ne!(second.job_id, first.job_id);
    assert_eq!(second.attempt_count, 2);

    let stale = queue
        .nack(first.job_id, Duration::ZERO, "late")
        .await
        .unwrap_err();
    assert!(stale.is_not_found());
    queue.extend(second.job_id, Duration::from_secs(60)).await.unwrap();
    queue.ack(second.job_id).await.unwrap();
}

#[tokio::test]
async fn test_stage_is_tracked_per_delivery() {
    let _guard = DB_LOCK.lock().await;
    let Some(queue) = test_queue().await else {
        return;
    };

    let message_id = queue.enqueue(job(0)).await.unwrap();
    let first = queue
        .claim("worker-a", 1, Duration::from_millis(200))
        .await
        .unwrap()
        .remove(0);
    queue.record_stage(first.job_id, "Embeddings").await.unwrap();

    let in_flight = queue.in_flight().await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].message_id, message_id);
    assert_eq!(in_flight[0].stage.as_deref(), Some("Embeddings"));
    assert_eq!(in_flight[0].claimed_by.as_deref(), Some("worker-a"));
    assert!(in_flight[0].stage_updated_at.is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let second = queue
        .claim("worker-b", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);

    let in_flight = queue.in_flight().await.unwrap();
    assert_eq!(in_flight[0].stage, None, "a new delivery starts without a stage");
    assert_eq!(in_flight[0].attempt_count, 2);
    assert!(
        queue
            .record_stage(first.job_id, "Finalize")
            .await
            .unwrap_err()
            .is_not_found()
    );

    queue.ack(second.job_id).await.unwrap();
    assert!(queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nack_then_dead_letter() {
    let _guard = DB_LOCK.lock().await;
    let Some(queue) = test_queue().await else {
        return;
    };

    queue.enqueue(job(0)).await.unwrap();
    let claimed = queue
        .claim("worker-a", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);

    queue
        .nack(claimed.job_id, Duration::from_secs(3600), "provider 503")
        .await
        .unwrap();
    assert!(
        queue
            .claim("worker-a", 1, Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty()
    );

    sqlx::query("UPDATE ingest_jobs SET visible_after = NOW()")
        .execute(queue.pool())
        .await
        .unwrap();
    let again = queue
        .claim("worker-a", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(again.attempt_count, 2);

    queue.dead_letter(again.job_id, "EmbeddingError: exhausted").await.unwrap();
    let depth = queue.depth().await.unwrap();
    assert_eq!(depth.dead_lettered, 1);
    assert_eq!(depth.queued + depth.leased, 0);

    let reason: String =
        sqlx::query_scalar("SELECT reason FROM ingest_jobs_dead_letter WHERE message_id = $1")
            .bind(again.message_id)
            .fetch_one(queue.pool())
            .await
            .unwrap();
    assert_eq!(reason, "EmbeddingError: exhausted");
}

#[tokio::test]
async fn test_batch_enqueue_and_concurrent_claims_do_not_overlap() {
    let _guard = DB_LOCK.lock().await;
    let Some(queue) = test_queue().await else {
        return;
    };

    let ids = queue
        .enqueue_batch((0..5).map(job).collect())
        .await
        .unwrap();
    assert_eq!(ids.len(), 5);

    let mut handles = Vec::new();
    for worker in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            queue
                .claim(&format!("worker-{worker}"), 2, Duration::from_secs(60))
                .await
                .unwrap()
        }));
    }

    let mut seen = std::collections::HashSet::new();
    for handle in handles {
        for job in handle.await.unwrap() {
            assert!(seen.insert(job.message_id), "job claimed twice");
        }
    }
    assert_eq!(seen.len(), 5);
}
