//! Job queue client contract
//!
//! A claim leases jobs: they stay invisible to other claimants until the
//! lease runs out, and every claim mints a new delivery id (`job_id`). Only
//! the holder of the current delivery id can ack, nack, extend or
//! dead-letter the job, or record its stage. A worker whose lease expired
//! and whose job was re-claimed gets `QueueError::NotFound` for all of them.

use crate::error::QueueResult;
use crate::models::{ClaimedJob, InFlightJob, NewJob, QueueDepth};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Queue operations used by producers and the worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job, returning its stable message id
    async fn enqueue(&self, job: NewJob) -> QueueResult<Uuid>;

    /// Add many jobs; implementations may write them in batches
    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> QueueResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.enqueue(job).await?);
        }
        Ok(ids)
    }

    /// Lease up to `max_batch` visible jobs for `lease`
    ///
    /// Jobs come back in `priority DESC, enqueued_at ASC` order (best effort
    /// across concurrent claimants). An empty queue is an empty `Vec`.
    async fn claim(
        &self,
        worker_id: &str,
        max_batch: usize,
        lease: Duration,
    ) -> QueueResult<Vec<ClaimedJob>>;

    /// Push the lease deadline to `now + lease`
    async fn extend(&self, job_id: Uuid, lease: Duration) -> QueueResult<()>;

    /// Remove the job for good; call only after the result is durable
    async fn ack(&self, job_id: Uuid) -> QueueResult<()>;

    /// Release the lease; the job is claimable again after `delay`
    async fn nack(&self, job_id: Uuid, delay: Duration, reason: &str) -> QueueResult<()>;

    /// Move the job to the dead-letter store with `reason` as its last error
    async fn dead_letter(&self, job_id: Uuid, reason: &str) -> QueueResult<()>;

    /// Note how far the current delivery got; cleared by the next claim
    async fn record_stage(&self, job_id: Uuid, stage: &str) -> QueueResult<()>;

    /// Current counts for monitoring
    async fn depth(&self) -> QueueResult<QueueDepth>;

    /// Leased jobs with their holder and last reported stage, oldest lease first
    async fn in_flight(&self) -> QueueResult<Vec<InFlightJob>>;
}
