//! PostgreSQL-backed job queue
//!
//! Uses the SKIP LOCKED pattern so any number of worker processes can claim
//! concurrently without blocking each other. A single `visible_after` column
//! serves both states: for queued rows it is the earliest claim time (retry
//! backoff), for leased rows it is the lease deadline. A row is claimable
//! whenever `visible_after <= NOW()`, which is exactly "queued and due" or
//! "leased and expired".
//!
//! Time comes from the database clock (`NOW()`), never from the worker host.

use crate::error::{DatabaseErrorExt, DatabaseOperation, QueueError, QueueResult};
use crate::models::{ClaimedJob, InFlightJob, NewJob, QueueDepth};
use crate::queue::JobQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use std::time::Duration;
use uuid::Uuid;

/// Row returned by the claim statement
#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    id: Uuid,
    delivery_id: Uuid,
    job_type: String,
    payload: Json<Value>,
    priority: i32,
    attempt_count: i32,
    enqueued_at: DateTime<Utc>,
    visible_after: DateTime<Utc>,
}

impl From<ClaimedRow> for ClaimedJob {
    fn from(row: ClaimedRow) -> Self {
        Self {
            job_id: row.delivery_id,
            message_id: row.id,
            job_type: row.job_type,
            payload: row.payload.0,
            priority: row.priority,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or_default(),
            enqueued_at: row.enqueued_at,
            lease_expires_at: row.visible_after,
        }
    }
}

/// Row moved into the dead-letter table
#[derive(Debug, sqlx::FromRow)]
struct DeadRow {
    id: Uuid,
    job_type: String,
    payload: Json<Value>,
    priority: i32,
    attempt_count: i32,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct InFlightRow {
    id: Uuid,
    job_type: String,
    attempt_count: i32,
    claimed_by: Option<String>,
    stage: Option<String>,
    stage_updated_at: Option<DateTime<Utc>>,
    visible_after: DateTime<Utc>,
}

impl From<InFlightRow> for InFlightJob {
    fn from(row: InFlightRow) -> Self {
        Self {
            message_id: row.id,
            job_type: row.job_type,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or_default(),
            claimed_by: row.claimed_by,
            stage: row.stage,
            stage_updated_at: row.stage_updated_at,
            lease_expires_at: row.visible_after,
        }
    }
}

/// `PostgreSQL` implementation of the job queue
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    batch_size: usize,
}

impl PostgresJobQueue {
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: 100,
        }
    }

    /// Rows written per statement by `enqueue_batch`
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

fn batch_limit(max_batch: usize) -> QueueResult<i64> {
    if max_batch == 0 {
        return Err(QueueError::InvalidRequest {
            message: "max_batch must be at least 1".to_string(),
        });
    }
    Ok(i64::try_from(max_batch).unwrap_or(i64::MAX))
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[tracing::instrument(skip(self, job), fields(message_id, priority = job.priority))]
    async fn enqueue(&self, job: NewJob) -> QueueResult<Uuid> {
        let id = Uuid::new_v4();
        let job_type = job.job_type_label();
        let operation = DatabaseOperation::Enqueue {
            job_type: job_type.clone(),
        };

        sqlx::query(
            r"
            INSERT INTO ingest_jobs (id, job_type, payload, priority, status, visible_after)
            VALUES ($1, $2, $3, $4, 'queued', NOW() + make_interval(secs => $5))
            ",
        )
        .bind(id)
        .bind(&job_type)
        .bind(Json(&job.payload))
        .bind(job.priority)
        .bind(seconds(job.delay))
        .execute(&self.pool)
        .await
        .map_db_err(operation, None)?;

        tracing::Span::current().record("message_id", tracing::field::display(id));
        tracing::debug!(job_type = %job_type, "Job enqueued");
        Ok(id)
    }

    #[tracing::instrument(skip(self, jobs), fields(job_count = jobs.len()))]
    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> QueueResult<Vec<Uuid>> {
        let mut all_ids = Vec::with_capacity(jobs.len());

        for batch in jobs.chunks(self.batch_size) {
            let ids: Vec<Uuid> = batch.iter().map(|_| Uuid::new_v4()).collect();
            let job_types: Vec<String> = batch.iter().map(NewJob::job_type_label).collect();
            let payloads: Vec<Value> = batch.iter().map(|job| job.payload.clone()).collect();
            let priorities: Vec<i32> = batch.iter().map(|job| job.priority).collect();
            let delays: Vec<f64> = batch.iter().map(|job| seconds(job.delay)).collect();

            sqlx::query(
                r"
                INSERT INTO ingest_jobs (id, job_type, payload, priority, status, visible_after)
                SELECT id, job_type, payload, priority, 'queued', NOW() + make_interval(secs => delay)
                FROM UNNEST($1::uuid[], $2::text[], $3::jsonb[], $4::int[], $5::float8[])
                    AS t(id, job_type, payload, priority, delay)
                ",
            )
            .bind(&ids)
            .bind(&job_types)
            .bind(&payloads)
            .bind(&priorities)
            .bind(&delays)
            .execute(&self.pool)
            .await
            .map_db_err(
                DatabaseOperation::Query {
                    description: format!("enqueue_batch(count={})", batch.len()),
                },
                None,
            )?;

            all_ids.extend(ids);
        }

        Ok(all_ids)
    }

    #[tracing::instrument(skip(self), fields(claimed))]
    async fn claim(
        &self,
        worker_id: &str,
        max_batch: usize,
        lease: Duration,
    ) -> QueueResult<Vec<ClaimedJob>> {
        let limit = batch_limit(max_batch)?;
        let operation = DatabaseOperation::Claim { max_batch };

        let rows = sqlx::query_as::<_, ClaimedRow>(
            r"
            WITH candidates AS (
                SELECT id
                FROM ingest_jobs
                WHERE status IN ('queued', 'leased')
                  AND visible_after <= NOW()
                ORDER BY priority DESC, enqueued_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE ingest_jobs
            SET status = 'leased',
                delivery_id = gen_random_uuid(),
                attempt_count = ingest_jobs.attempt_count + 1,
                claimed_by = $2,
                claimed_at = NOW(),
                stage = NULL,
                stage_updated_at = NULL,
                visible_after = NOW() + make_interval(secs => $3)
            FROM candidates
            WHERE ingest_jobs.id = candidates.id
            RETURNING ingest_jobs.id,
                      ingest_jobs.delivery_id,
                      ingest_jobs.job_type,
                      ingest_jobs.payload,
                      ingest_jobs.priority,
                      ingest_jobs.attempt_count,
                      ingest_jobs.enqueued_at,
                      ingest_jobs.visible_after
            ",
        )
        .bind(limit)
        .bind(worker_id)
        .bind(seconds(lease))
        .fetch_all(&self.pool)
        .await
        .map_db_err(operation, None)?;

        // UPDATE ... RETURNING does not preserve the CTE ordering
        let mut jobs: Vec<ClaimedJob> = rows.into_iter().map(ClaimedJob::from).collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });

        tracing::Span::current().record("claimed", jobs.len());
        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn extend(&self, job_id: Uuid, lease: Duration) -> QueueResult<()> {
        let result = sqlx::query(
            r"
            UPDATE ingest_jobs
            SET visible_after = NOW() + make_interval(secs => $2)
            WHERE delivery_id = $1 AND status = 'leased'
            ",
        )
        .bind(job_id)
        .bind(seconds(lease))
        .execute(&self.pool)
        .await
        .map_db_err(DatabaseOperation::ExtendLease { job_id }, None)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::not_found(job_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn ack(&self, job_id: Uuid) -> QueueResult<()> {
        let result = sqlx::query(
            r"
            DELETE FROM ingest_jobs
            WHERE delivery_id = $1 AND status = 'leased'
            ",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_db_err(DatabaseOperation::Ack { job_id }, None)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::not_found(job_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, reason))]
    async fn nack(&self, job_id: Uuid, delay: Duration, reason: &str) -> QueueResult<()> {
        let result = sqlx::query(
            r"
            UPDATE ingest_jobs
            SET status = 'queued',
                delivery_id = NULL,
                claimed_by = NULL,
                claimed_at = NULL,
                last_error = $3,
                visible_after = NOW() + make_interval(secs => $2)
            WHERE delivery_id = $1 AND status = 'leased'
            ",
        )
        .bind(job_id)
        .bind(seconds(delay))
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_db_err(DatabaseOperation::Nack { job_id }, None)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::not_found(job_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, reason))]
    async fn dead_letter(&self, job_id: Uuid, reason: &str) -> QueueResult<()> {
        let operation = DatabaseOperation::DeadLetter { job_id };
        let mut tx = self
            .pool
            .begin()
            .await
            .map_db_err(operation.clone(), None)?;

        let row = sqlx::query_as::<_, DeadRow>(
            r"
            DELETE FROM ingest_jobs
            WHERE delivery_id = $1 AND status = 'leased'
            RETURNING id, job_type, payload, priority, attempt_count, enqueued_at
            ",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_db_err(operation.clone(), None)?;

        let Some(row) = row else {
            return Err(QueueError::not_found(job_id));
        };

        sqlx::query(
            r"
            INSERT INTO ingest_jobs_dead_letter
                (message_id, job_type, payload, priority, attempt_count, reason, enqueued_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(row.id)
        .bind(&row.job_type)
        .bind(&row.payload)
        .bind(row.priority)
        .bind(row.attempt_count)
        .bind(reason)
        .bind(row.enqueued_at)
        .execute(&mut *tx)
        .await
        .map_db_err(operation.clone(), None)?;

        tx.commit().await.map_db_err(operation, None)?;

        tracing::warn!(message_id = %row.id, attempts = row.attempt_count, "Job dead-lettered");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn record_stage(&self, job_id: Uuid, stage: &str) -> QueueResult<()> {
        let result = sqlx::query(
            r"
            UPDATE ingest_jobs
            SET stage = $2,
                stage_updated_at = NOW()
            WHERE delivery_id = $1 AND status = 'leased'
            ",
        )
        .bind(job_id)
        .bind(stage)
        .execute(&self.pool)
        .await
        .map_db_err(
            DatabaseOperation::RecordStage {
                job_id,
                stage: stage.to_string(),
            },
            None,
        )?;

        if result.rows_affected() == 0 {
            return Err(QueueError::not_found(job_id));
        }
        Ok(())
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let (queued, leased, dead_lettered): (i64, i64, i64) = sqlx::query_as(
            r"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'leased'),
                (SELECT COUNT(*) FROM ingest_jobs_dead_letter)
            FROM ingest_jobs
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_db_err(DatabaseOperation::QueueDepth, None)?;

        Ok(QueueDepth {
            queued,
            leased,
            dead_lettered,
        })
    }

    async fn in_flight(&self) -> QueueResult<Vec<InFlightJob>> {
        let rows = sqlx::query_as::<_, InFlightRow>(
            r"
            SELECT id, job_type, attempt_count, claimed_by, stage, stage_updated_at, visible_after
            FROM ingest_jobs
            WHERE status = 'leased'
            ORDER BY visible_after ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_db_err(DatabaseOperation::InFlight, None)?;

        Ok(rows.into_iter().map(InFlightJob::from).collect())
    }
}
