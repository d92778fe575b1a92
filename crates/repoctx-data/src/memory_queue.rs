//! Process-local job queue
//!
//! Same leasing semantics as the Postgres queue, backed by a mutex-guarded
//! map. Deadlines use `tokio::time::Instant` so tests running with paused
//! time can expire leases deterministically.

use crate::error::{DatabaseError, DatabaseOperation, QueueError, QueueResult};
use crate::models::{ClaimedJob, DeadLetteredJob, InFlightJob, NewJob, QueueDepth};
use crate::queue::JobQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Queued,
    Leased,
}

#[derive(Debug, Clone)]
struct Entry {
    message_id: Uuid,
    delivery_id: Option<Uuid>,
    job_type: String,
    payload: Value,
    priority: i32,
    attempt_count: u32,
    sequence: u64,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
    status: EntryStatus,
    claimed_by: Option<String>,
    last_error: Option<String>,
    stage: Option<String>,
    stage_updated_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one job, for assertions
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub message_id: Uuid,
    pub status: EntryStatus,
    pub attempt_count: u32,
    pub claimed_by: Option<String>,
    pub last_error: Option<String>,
    pub stage: Option<String>,
    /// Time until the job becomes claimable (zero if it already is)
    pub visible_in: Duration,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Uuid, Entry>,
    deliveries: HashMap<Uuid, Uuid>,
    dead_letters: Vec<DeadLetteredJob>,
    next_sequence: u64,
}

impl State {
    fn leased_entry(&mut self, job_id: Uuid) -> QueueResult<&mut Entry> {
        let message_id = *self
            .deliveries
            .get(&job_id)
            .ok_or_else(|| QueueError::not_found(job_id))?;
        self.entries
            .get_mut(&message_id)
            .filter(|entry| {
                entry.status == EntryStatus::Leased && entry.delivery_id == Some(job_id)
            })
            .ok_or_else(|| QueueError::not_found(job_id))
    }

    fn retire_delivery(&mut self, job_id: Uuid) {
        self.deliveries.remove(&job_id);
    }
}

/// In-memory queue for tests and single-process runs
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<State>>,
    failing_claims: Arc<AtomicUsize>,
    claim_calls: Arc<AtomicUsize>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` claim calls fail with a connection error
    #[must_use]
    pub fn with_claim_failures(self, count: usize) -> Self {
        self.failing_claims.store(count, Ordering::SeqCst);
        self
    }

    /// Number of claim calls made so far (including failed ones)
    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetteredJob> {
        self.state.lock().await.dead_letters.clone()
    }

    pub async fn snapshot(&self, message_id: Uuid) -> Option<JobSnapshot> {
        let now = Instant::now();
        let state = self.state.lock().await;
        state.entries.get(&message_id).map(|entry| JobSnapshot {
            message_id: entry.message_id,
            status: entry.status,
            attempt_count: entry.attempt_count,
            claimed_by: entry.claimed_by.clone(),
            last_error: entry.last_error.clone(),
            stage: entry.stage.clone(),
            visible_in: entry.visible_at.saturating_duration_since(now),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> QueueResult<Uuid> {
        let message_id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence = sequence.saturating_add(1);

        state.entries.insert(
            message_id,
            Entry {
                message_id,
                delivery_id: None,
                job_type: job.job_type_label(),
                payload: job.payload,
                priority: job.priority,
                attempt_count: 0,
                sequence,
                enqueued_at: Utc::now(),
                visible_at: Instant::now() + job.delay,
                status: EntryStatus::Queued,
                claimed_by: None,
                last_error: None,
                stage: None,
                stage_updated_at: None,
            },
        );
        Ok(message_id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        max_batch: usize,
        lease: Duration,
    ) -> QueueResult<Vec<ClaimedJob>> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DatabaseError::query_failed(
                DatabaseOperation::Claim { max_batch },
                sqlx::Error::PoolTimedOut,
                None,
            )
            .into());
        }
        if max_batch == 0 {
            return Err(QueueError::InvalidRequest {
                message: "max_batch must be at least 1".to_string(),
            });
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;

        let mut visible: Vec<&Entry> = state
            .entries
            .values()
            .filter(|entry| entry.visible_at <= now)
            .collect();
        visible.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        let selected: Vec<Uuid> = visible
            .into_iter()
            .take(max_batch)
            .map(|entry| entry.message_id)
            .collect();

        let lease_expires_at = Utc::now()
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
        let mut claimed = Vec::with_capacity(selected.len());

        for message_id in selected {
            let delivery_id = Uuid::new_v4();
            let Some(entry) = state.entries.get_mut(&message_id) else {
                continue;
            };
            let previous = entry.delivery_id.replace(delivery_id);
            entry.status = EntryStatus::Leased;
            entry.attempt_count = entry.attempt_count.saturating_add(1);
            entry.visible_at = now + lease;
            entry.claimed_by = Some(worker_id.to_string());
            entry.stage = None;
            entry.stage_updated_at = None;

            claimed.push(ClaimedJob {
                job_id: delivery_id,
                message_id,
                job_type: entry.job_type.clone(),
                payload: entry.payload.clone(),
                priority: entry.priority,
                attempt_count: entry.attempt_count,
                enqueued_at: entry.enqueued_at,
                lease_expires_at,
            });

            if let Some(previous) = previous {
                state.retire_delivery(previous);
            }
            state.deliveries.insert(delivery_id, message_id);
        }

        Ok(claimed)
    }

    async fn extend(&self, job_id: Uuid, lease: Duration) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.leased_entry(job_id)?;
        entry.visible_at = Instant::now() + lease;
        Ok(())
    }

    async fn ack(&self, job_id: Uuid) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let message_id = state.leased_entry(job_id)?.message_id;
        state.entries.remove(&message_id);
        state.retire_delivery(job_id);
        Ok(())
    }

    async fn nack(&self, job_id: Uuid, delay: Duration, reason: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.leased_entry(job_id)?;
        entry.status = EntryStatus::Queued;
        entry.delivery_id = None;
        entry.claimed_by = None;
        entry.last_error = Some(reason.to_string());
        entry.visible_at = Instant::now() + delay;
        state.retire_delivery(job_id);
        Ok(())
    }

    async fn dead_letter(&self, job_id: Uuid, reason: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let message_id = state.leased_entry(job_id)?.message_id;
        let Some(entry) = state.entries.remove(&message_id) else {
            return Err(QueueError::not_found(job_id));
        };
        state.retire_delivery(job_id);
        state.dead_letters.push(DeadLetteredJob {
            message_id: entry.message_id,
            job_type: entry.job_type,
            payload: entry.payload,
            attempt_count: entry.attempt_count,
            reason: reason.to_string(),
            enqueued_at: entry.enqueued_at,
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    async fn record_stage(&self, job_id: Uuid, stage: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.leased_entry(job_id)?;
        entry.stage = Some(stage.to_string());
        entry.stage_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let state = self.state.lock().await;
        let count = |status: EntryStatus| {
            let n = state
                .entries
                .values()
                .filter(|entry| entry.status == status)
                .count();
            i64::try_from(n).unwrap_or(i64::MAX)
        };

        Ok(QueueDepth {
            queued: count(EntryStatus::Queued),
            leased: count(EntryStatus::Leased),
            dead_lettered: i64::try_from(state.dead_letters.len()).unwrap_or(i64::MAX),
        })
    }

    async fn in_flight(&self) -> QueueResult<Vec<InFlightJob>> {
        let now = Instant::now();
        let wall = Utc::now();
        let state = self.state.lock().await;

        let mut leased: Vec<&Entry> = state
            .entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Leased)
            .collect();
        leased.sort_by_key(|entry| entry.visible_at);

        Ok(leased
            .into_iter()
            .map(|entry| {
                let remaining = entry.visible_at.saturating_duration_since(now);
                InFlightJob {
                    message_id: entry.message_id,
                    job_type: entry.job_type.clone(),
                    attempt_count: entry.attempt_count,
                    claimed_by: entry.claimed_by.clone(),
                    stage: entry.stage.clone(),
                    stage_updated_at: entry.stage_updated_at,
                    lease_expires_at: chrono::Duration::from_std(remaining)
                        .ok()
                        .and_then(|remaining| wall.checked_add_signed(remaining))
                        .unwrap_or(wall),
                }
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(60);

    fn job(priority: i32) -> NewJob {
        NewJob::new(json!({ "job_type": "process", "payload": {} })).with_priority(priority)
    }

    #[tokio::test]
    async fn test_empty_queue_claims_nothing() {
        let queue = InMemoryJobQueue::new();
        let claimed = queue.claim("w1", 5, LEASE).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let queue = InMemoryJobQueue::new();
        let low = queue.enqueue(job(0)).await.unwrap();
        let high = queue.enqueue(job(9)).await.unwrap();
        let low_later = queue.enqueue(job(0)).await.unwrap();

        let claimed = queue.claim("w1", 3, LEASE).await.unwrap();
        let order: Vec<Uuid> = claimed.iter().map(|j| j.message_id).collect();
        assert_eq!(order, vec![high, low, low_later]);
        assert!(claimed.iter().all(|j| j.attempt_count == 1));
    }

    #[tokio::test]
    async fn test_leased_job_is_invisible_to_other_claimants() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(job(0)).await.unwrap();

        let first = queue.claim("w1", 1, LEASE).await.unwrap();
        let second = queue.claim("w2", 1, LEASE).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_reclaimable_and_old_delivery_is_stale() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(job(0)).await.unwrap();

        let first = queue.claim("w1", 1, LEASE).await.unwrap().remove(0);
        tokio::time::advance(LEASE + Duration::from_secs(1)).await;

        let second = queue.claim("w2", 1, LEASE).await.unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_ne!(second.job_id, first.job_id);
        assert_eq!(second.attempt_count, 2);

        assert!(queue.ack(first.job_id).await.unwrap_err().is_not_found());
        assert!(queue.extend(first.job_id, LEASE).await.unwrap_err().is_not_found());
        assert!(queue.ack(second.job_id).await.is_ok());
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_keeps_job_invisible() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(job(0)).await.unwrap();
        let claimed = queue.claim("w1", 1, LEASE).await.unwrap().remove(0);

        tokio::time::advance(Duration::from_secs(50)).await;
        queue.extend(claimed.job_id, LEASE).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        assert!(queue.claim("w2", 1, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_delays_redelivery() {
        let queue = InMemoryJobQueue::new();
        let message_id = queue.enqueue(job(0)).await.unwrap();
        let claimed = queue.claim("w1", 1, LEASE).await.unwrap().remove(0);

        queue
            .nack(claimed.job_id, Duration::from_secs(30), "embedding provider 503")
            .await
            .unwrap();

        let snapshot = queue.snapshot(message_id).await.unwrap();
        assert_eq!(snapshot.status, EntryStatus::Queued);
        assert_eq!(snapshot.visible_in, Duration::from_secs(30));
        assert_eq!(snapshot.last_error.as_deref(), Some("embedding provider 503"));
        assert!(queue.claim("w1", 1, LEASE).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        let again = queue.claim("w1", 1, LEASE).await.unwrap();
        assert_eq!(again[0].attempt_count, 2);
        assert!(queue.ack(claimed.job_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_dead_letter_moves_job() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(job(0)).await.unwrap();
        let claimed = queue.claim("w1", 1, LEASE).await.unwrap().remove(0);

        queue
            .dead_letter(claimed.job_id, "InvalidPayload: missing relative_path")
            .await
            .unwrap();

        let depth = queue.depth().await.unwrap();
        assert_eq!(
            depth,
            QueueDepth {
                queued: 0,
                leased: 0,
                dead_lettered: 1
            }
        );
        let dead = queue.dead_letters().await;
        assert_eq!(dead[0].reason, "InvalidPayload: missing relative_path");
        assert!(
            queue
                .dead_letter(claimed.job_id, "again")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_belongs_to_the_live_delivery() {
        let queue = InMemoryJobQueue::new();
        let message_id = queue.enqueue(job(0)).await.unwrap();
        let first = queue.claim("w1", 1, LEASE).await.unwrap().remove(0);

        queue.record_stage(first.job_id, "SourceFetch").await.unwrap();
        let in_flight = queue.in_flight().await.unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].message_id, message_id);
        assert_eq!(in_flight[0].stage.as_deref(), Some("SourceFetch"));
        assert_eq!(in_flight[0].claimed_by.as_deref(), Some("w1"));
        assert!(in_flight[0].stage_updated_at.is_some());

        tokio::time::advance(LEASE + Duration::from_secs(1)).await;
        let second = queue.claim("w2", 1, LEASE).await.unwrap().remove(0);
        assert!(queue.snapshot(message_id).await.unwrap().stage.is_none());
        assert!(
            queue
                .record_stage(first.job_id, "Embeddings")
                .await
                .unwrap_err()
                .is_not_found()
        );

        queue.record_stage(second.job_id, "Chunking").await.unwrap();
        let snapshot = queue.snapshot(message_id).await.unwrap();
        assert_eq!(snapshot.stage.as_deref(), Some("Chunking"));

        queue.ack(second.job_id).await.unwrap();
        assert!(queue.in_flight().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_claim_failures() {
        let queue = InMemoryJobQueue::new().with_claim_failures(2);
        assert!(queue.claim("w1", 1, LEASE).await.is_err());
        assert!(queue.claim("w1", 1, LEASE).await.is_err());
        assert!(queue.claim("w1", 1, LEASE).await.is_ok());
        assert_eq!(queue.claim_calls(), 3);
    }
}
