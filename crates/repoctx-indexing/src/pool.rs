//! Worker pool: N polling slots sharing one queue and one job handler
//!
//! Each slot cycles `Idle → Claiming → Processing → Resolving → Idle` and
//! leaves through `Draining → Stopped` once shutdown is requested. A shutdown
//! never interrupts a job in `Processing`; `stop` waits for in-flight jobs up
//! to the configured timeout and then aborts what is left, leaving those leases
//! to expire.
//!
//! All shared state lives in one [`PoolContext`] created by [`WorkerPool::start`]
//! and handed to every slot.

use crate::callback::CompletionCallback;
use crate::error::{IndexingError, IndexingResult};
use crate::processor::JobHandler;
use crate::result::{ProcessingResult, ProcessingStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use repoctx_common::backoff::Backoff;
use repoctx_config::ApplicationConfig;
use repoctx_data::{ClaimedJob, InFlightJob, JobQueue, QueueDepth, QueueError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Heartbeats per lease period
const HEARTBEATS_PER_LEASE: u32 = 3;

/// Settings for one pool instance
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub claim_backoff: Backoff,
    pub retry_backoff: Backoff,
    pub max_attempts: u32,
    pub shutdown_timeout: Duration,
    /// Per-request timeout for completion callbacks
    pub callback_timeout: Duration,
    /// Prefix for per-slot worker ids recorded on claimed rows
    pub worker_prefix: String,
}

impl PoolSettings {
    pub fn from_config(config: &ApplicationConfig) -> Self {
        Self {
            concurrency: config.worker.concurrency,
            poll_interval: config.queue.polling_interval(),
            lease: config.queue.lease_duration(),
            claim_backoff: config.queue.claim_backoff(),
            retry_backoff: config.retry.backoff(),
            max_attempts: config.retry.max_attempts,
            shutdown_timeout: config.worker.shutdown_timeout(),
            callback_timeout: config.worker.callback_timeout(),
            worker_prefix: format!("repoctx-{}", std::process::id()),
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        (self.lease / HEARTBEATS_PER_LEASE).max(Duration::from_millis(1))
    }
}

/// What a slot is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Idle,
    Claiming,
    Processing,
    Resolving,
    Draining,
    Stopped,
}

/// Terminal queue action for one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ack,
    Retry { delay: Duration, reason: String },
    DeadLetter { reason: String },
}

impl Resolution {
    /// Pick the queue action for a processing result
    ///
    /// Success and partial results are acknowledged. A retryable failure is
    /// requeued with `backoff.delay_for(attempt_count)` while attempts remain;
    /// everything else is dead-lettered with the error summary.
    pub fn decide(
        result: &ProcessingResult,
        attempt_count: u32,
        max_attempts: u32,
        backoff: &Backoff,
    ) -> Self {
        if result.status != ProcessingStatus::Failed {
            return Self::Ack;
        }
        let Some(summary) = result.error_summary.as_ref() else {
            return Self::DeadLetter {
                reason: "failed without summary".to_string(),
            };
        };

        if summary.retryable && attempt_count < max_attempts {
            Self::Retry {
                delay: backoff.delay_for(attempt_count),
                reason: summary.reason(),
            }
        } else {
            Self::DeadLetter {
                reason: summary.reason(),
            }
        }
    }

    const fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Retry { .. } => "retry",
            Self::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// Point-in-time view of the pool for liveness checks
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub configured_slots: usize,
    pub active_slots: usize,
    pub busy_slots: usize,
    pub shutting_down: bool,
    pub started_at: DateTime<Utc>,
    /// Last claim call that reached the queue, empty or not
    pub last_claim_at: Option<DateTime<Utc>>,
    pub slots: Vec<SlotState>,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_partial: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub claim_failures: u64,
    pub resolve_failures: u64,
}

impl PoolHealth {
    /// Ready while running with at least one live slot that is busy or has
    /// polled the queue within `max_idle`
    pub fn is_ready(&self, max_idle: Duration, now: DateTime<Utc>) -> bool {
        if self.shutting_down || self.active_slots == 0 {
            return false;
        }
        if self.busy_slots > 0 {
            return true;
        }
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::TimeDelta::MAX);
        self.last_claim_at
            .is_some_and(|at| now.signed_duration_since(at) <= max_idle)
    }
}

/// Shared state owned by the pool and lent to every slot
#[derive(Debug)]
pub struct PoolContext {
    settings: PoolSettings,
    started_at: DateTime<Utc>,
    slots: DashMap<usize, SlotState>,
    active_slots: AtomicUsize,
    busy_slots: AtomicUsize,
    last_claim_at: Mutex<Option<DateTime<Utc>>>,
    jobs_processed: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_partial: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dead_lettered: AtomicU64,
    claim_failures: AtomicU64,
    resolve_failures: AtomicU64,
}

impl PoolContext {
    fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            started_at: Utc::now(),
            slots: DashMap::new(),
            active_slots: AtomicUsize::new(0),
            busy_slots: AtomicUsize::new(0),
            last_claim_at: Mutex::new(None),
            jobs_processed: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_partial: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_dead_lettered: AtomicU64::new(0),
            claim_failures: AtomicU64::new(0),
            resolve_failures: AtomicU64::new(0),
        }
    }

    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn set_state(&self, slot: usize, state: SlotState) {
        self.slots.insert(slot, state);
    }

    fn record_claim(&self) {
        *self
            .last_claim_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    fn record_result(&self, result: &ProcessingResult) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        let counter = match result.status {
            ProcessingStatus::Succeeded => &self.jobs_succeeded,
            ProcessingStatus::Partial => &self.jobs_partial,
            ProcessingStatus::Failed => &self.jobs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_resolution(&self, resolution: &Resolution) {
        match resolution {
            Resolution::Ack => {}
            Resolution::Retry { .. } => {
                self.jobs_retried.fetch_add(1, Ordering::Relaxed);
            }
            Resolution::DeadLetter { .. } => {
                self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::counter!("repoctx_job_resolutions_total", "action" => resolution.as_str())
            .increment(1);
    }

    fn health(&self, shutting_down: bool) -> PoolHealth {
        let mut slots: Vec<(usize, SlotState)> = self
            .slots
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        slots.sort_by_key(|(slot, _)| *slot);

        PoolHealth {
            configured_slots: self.settings.concurrency,
            active_slots: self.active_slots.load(Ordering::Relaxed),
            busy_slots: self.busy_slots.load(Ordering::Relaxed),
            shutting_down,
            started_at: self.started_at,
            last_claim_at: *self
                .last_claim_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            slots: slots.into_iter().map(|(_, state)| state).collect(),
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_partial: self.jobs_partial.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            claim_failures: self.claim_failures.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
        }
    }
}

/// Pool-wide shutdown trigger, cheap to clone into signal handlers
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Stop claiming new jobs on every slot; in-flight jobs run to completion
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Worker pool shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// Outcome of [`WorkerPool::stop`]
#[derive(Debug)]
pub struct StopReport {
    /// Every slot reached `Stopped` before the timeout
    pub drained: bool,
    /// Slots aborted after the timeout
    pub aborted_slots: usize,
    pub slot_failures: Vec<IndexingError>,
    pub health: PoolHealth,
}

/// Running pool of polling slots
pub struct WorkerPool {
    context: Arc<PoolContext>,
    queue: Arc<dyn JobQueue>,
    shutdown: CancellationToken,
    slots: JoinSet<usize>,
}

impl WorkerPool {
    /// Spawn `settings.concurrency` slots and return immediately
    ///
    /// # Errors
    /// Returns `IndexingError::Configuration` for a zero concurrency or lease
    pub fn start(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        settings: PoolSettings,
    ) -> IndexingResult<Self> {
        if settings.concurrency == 0 {
            return Err(IndexingError::Configuration(
                "worker concurrency must be at least 1".to_string(),
            ));
        }
        if settings.lease.is_zero() {
            return Err(IndexingError::Configuration(
                "lease duration must be positive".to_string(),
            ));
        }

        info!(
            concurrency = settings.concurrency,
            lease_secs = settings.lease.as_secs(),
            max_attempts = settings.max_attempts,
            "Starting worker pool"
        );

        let callback = Arc::new(CompletionCallback::new(settings.callback_timeout)?);
        let context = Arc::new(PoolContext::new(settings));
        let shutdown = CancellationToken::new();
        let mut slots = JoinSet::new();

        for slot in 0..context.settings.concurrency {
            context.set_state(slot, SlotState::Idle);
            context.active_slots.fetch_add(1, Ordering::Relaxed);

            let slot_task = Slot {
                index: slot,
                worker_id: format!("{}-{slot}", context.settings.worker_prefix),
                queue: Arc::clone(&queue),
                handler: Arc::clone(&handler),
                callback: Arc::clone(&callback),
                context: Arc::clone(&context),
                shutdown: shutdown.clone(),
            };
            slots.spawn(async move {
                slot_task.run().await;
                slot
            });
        }

        Ok(Self {
            context,
            queue,
            shutdown,
            slots,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn context(&self) -> Arc<PoolContext> {
        Arc::clone(&self.context)
    }

    pub fn health(&self) -> PoolHealth {
        self.context.health(self.shutdown.is_cancelled())
    }

    pub fn is_ready(&self, max_idle: Duration) -> bool {
        self.health().is_ready(max_idle, Utc::now())
    }

    /// Queue counts, for periodic status logging
    ///
    /// # Errors
    /// Returns `IndexingError::Queue` if the queue cannot be read
    pub async fn queue_depth(&self) -> IndexingResult<QueueDepth> {
        Ok(self.queue.depth().await?)
    }

    /// Leased deliveries across all workers with their last recorded stage
    ///
    /// # Errors
    /// Returns `IndexingError::Queue` if the queue cannot be read
    pub async fn in_flight(&self) -> IndexingResult<Vec<InFlightJob>> {
        Ok(self.queue.in_flight().await?)
    }

    /// Request shutdown and wait for the slots to drain
    pub async fn stop(mut self) -> StopReport {
        self.shutdown.cancel();
        let timeout = self.context.settings.shutdown_timeout;
        info!(
            in_flight = self.context.busy_slots.load(Ordering::Relaxed),
            timeout_secs = timeout.as_secs(),
            "Draining worker pool"
        );

        let mut slot_failures = Vec::new();
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = self.slots.join_next().await {
                if let Err(e) = joined {
                    slot_failures.push(e);
                }
            }
        })
        .await
        .is_ok();

        let aborted_slots = self.slots.len();
        if !drained {
            warn!(
                aborted_slots,
                "Shutdown timeout elapsed; abandoning in-flight jobs to lease expiry"
            );
            self.slots.abort_all();
            while let Some(joined) = self.slots.join_next().await {
                if let Err(e) = joined {
                    if !e.is_cancelled() {
                        slot_failures.push(e);
                    }
                }
            }
        }

        let slot_failures: Vec<IndexingError> = slot_failures
            .into_iter()
            .map(|e| {
                let failure = IndexingError::SlotPanicked {
                    message: e.to_string(),
                };
                error!(error = %failure, "Worker slot ended abnormally");
                failure
            })
            .collect();

        let health = self.context.health(true);
        info!(
            drained,
            aborted_slots,
            jobs_processed = health.jobs_processed,
            jobs_dead_lettered = health.jobs_dead_lettered,
            "Worker pool stopped"
        );
        StopReport {
            drained,
            aborted_slots,
            slot_failures,
            health,
        }
    }
}

fn record_busy(busy: usize) {
    let busy = u32::try_from(busy).unwrap_or(u32::MAX);
    metrics::gauge!("repoctx_pool_busy_slots").set(f64::from(busy));
}

/// Aborts the wrapped task when dropped
struct TaskGuard<T>(JoinHandle<T>);

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One polling loop
struct Slot {
    index: usize,
    worker_id: String,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    callback: Arc<CompletionCallback>,
    context: Arc<PoolContext>,
    shutdown: CancellationToken,
}

impl Slot {
    async fn run(self) {
        debug!(slot = self.index, worker_id = %self.worker_id, "Worker slot started");
        let mut idle_wait: Option<Duration> = None;
        let mut claim_failures: u32 = 0;

        loop {
            self.context.set_state(self.index, SlotState::Idle);
            if let Some(wait) = idle_wait.take() {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => break,
                    () = tokio::time::sleep(wait) => {}
                }
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            self.context.set_state(self.index, SlotState::Claiming);
            let settings = &self.context.settings;
            match self.queue.claim(&self.worker_id, 1, settings.lease).await {
                Ok(jobs) => {
                    claim_failures = 0;
                    self.context.record_claim();
                    match jobs.into_iter().next() {
                        Some(job) => self.handle(job).await,
                        None => idle_wait = Some(settings.poll_interval),
                    }
                }
                Err(e) => {
                    claim_failures = claim_failures.saturating_add(1);
                    self.context.claim_failures.fetch_add(1, Ordering::Relaxed);
                    let delay = settings.claim_backoff.delay_for(claim_failures);
                    warn!(
                        slot = self.index,
                        error = %e,
                        consecutive_failures = claim_failures,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Failed to claim job"
                    );
                    idle_wait = Some(delay);
                }
            }
        }

        self.context.set_state(self.index, SlotState::Draining);
        self.context.active_slots.fetch_sub(1, Ordering::Relaxed);
        self.context.set_state(self.index, SlotState::Stopped);
        debug!(slot = self.index, "Worker slot stopped");
    }

    /// Process and resolve one delivery
    async fn handle(&self, job: ClaimedJob) {
        let job_id = job.job_id;
        let attempt_count = job.attempt_count;
        self.context.set_state(self.index, SlotState::Processing);
        let busy = self
            .context
            .busy_slots
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        record_busy(busy);
        debug!(
            slot = self.index,
            job_id = %job_id,
            message_id = %job.message_id,
            attempt = attempt_count,
            "Claimed job"
        );

        let notify = CompletionCallback::url_for(&job).map(|url| (url, job.clone()));
        let heartbeat = self.spawn_heartbeat(job_id);
        let handler = Arc::clone(&self.handler);
        let mut task = TaskGuard(tokio::spawn(async move { handler.process(&job).await }));
        let joined = (&mut task.0).await;
        drop(heartbeat);

        self.context.set_state(self.index, SlotState::Resolving);
        let settings = &self.context.settings;
        let resolution = match &joined {
            Ok(result) => {
                self.context.record_result(result);
                Resolution::decide(
                    result,
                    attempt_count,
                    settings.max_attempts,
                    &settings.retry_backoff,
                )
            }
            Err(e) => {
                self.context.jobs_failed.fetch_add(1, Ordering::Relaxed);
                self.context.jobs_processed.fetch_add(1, Ordering::Relaxed);
                let reason = format!("processor task ended abnormally: {e}");
                error!(job_id = %job_id, error = %e, "Job processing panicked");
                if attempt_count < settings.max_attempts {
                    Resolution::Retry {
                        delay: settings.retry_backoff.delay_for(attempt_count),
                        reason,
                    }
                } else {
                    Resolution::DeadLetter { reason }
                }
            }
        };

        let resolved = self.resolve(job_id, attempt_count, &resolution).await;
        // Only terminal outcomes are reported, and only once the queue agreed
        if resolved && !matches!(resolution, Resolution::Retry { .. }) {
            if let (Some((url, job)), Ok(result)) = (notify, &joined) {
                self.callback.notify(&url, &job, result).await;
            }
        }
        let busy = self
            .context
            .busy_slots
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        record_busy(busy);
    }

    /// Apply `resolution`; `false` when the queue call failed
    async fn resolve(&self, job_id: Uuid, attempt_count: u32, resolution: &Resolution) -> bool {
        let outcome: Result<(), QueueError> = match resolution {
            Resolution::Ack => self.queue.ack(job_id).await,
            Resolution::Retry { delay, reason } => {
                info!(
                    job_id = %job_id,
                    attempt = attempt_count,
                    retry_in_secs = delay.as_secs(),
                    reason = %reason,
                    "Requeueing job"
                );
                self.queue.nack(job_id, *delay, reason).await
            }
            Resolution::DeadLetter { reason } => {
                warn!(
                    job_id = %job_id,
                    attempt = attempt_count,
                    reason = %reason,
                    "Dead-lettering job"
                );
                self.queue.dead_letter(job_id, reason).await
            }
        };

        match outcome {
            Ok(()) => {
                self.context.record_resolution(resolution);
                true
            }
            Err(e) => {
                self.context.resolve_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %job_id,
                    action = resolution.as_str(),
                    error = %e,
                    "Failed to resolve job; it will be redelivered after its lease expires"
                );
                false
            }
        }
    }

    /// Extend the lease every `lease / 3` until the guard is dropped
    fn spawn_heartbeat(&self, job_id: Uuid) -> TaskGuard<()> {
        let queue = Arc::clone(&self.queue);
        let lease = self.context.settings.lease;
        let period = self.context.settings.heartbeat_interval();

        TaskGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.extend(job_id, lease).await {
                    Ok(()) => debug!(job_id = %job_id, "Lease extended"),
                    Err(QueueError::NotFound { .. }) => {
                        warn!(job_id = %job_id, "Lease lost; job may be redelivered");
                        break;
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to extend lease"),
                }
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{ErrorSummary, FailureKind};

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(30), Duration::from_secs(900)).without_jitter()
    }

    fn failed(retryable: bool) -> ProcessingResult {
        ProcessingResult::failed(
            "ctx",
            ErrorSummary::new(FailureKind::EmbeddingError, "503", retryable),
            Duration::ZERO,
        )
    }

    #[test]
    fn test_success_and_partial_are_acked() {
        let ok = ProcessingResult::succeeded("ctx", 3, Duration::ZERO);
        assert_eq!(Resolution::decide(&ok, 1, 3, &backoff()), Resolution::Ack);

        let partial = ProcessingResult::partial(
            "ctx",
            3,
            ErrorSummary::new(FailureKind::ChunkingError, "1 file", false),
            Duration::ZERO,
        );
        assert_eq!(Resolution::decide(&partial, 1, 3, &backoff()), Resolution::Ack);
    }

    #[test]
    fn test_retryable_failure_backs_off_by_attempt() {
        match Resolution::decide(&failed(true), 2, 3, &backoff()) {
            Resolution::Retry { delay, reason } => {
                assert_eq!(delay, Duration::from_secs(60));
                assert!(reason.starts_with("EmbeddingError"));
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_exhausted_or_permanent_failures_dead_letter() {
        assert!(matches!(
            Resolution::decide(&failed(true), 3, 3, &backoff()),
            Resolution::DeadLetter { .. }
        ));
        assert!(matches!(
            Resolution::decide(&failed(true), 4, 3, &backoff()),
            Resolution::DeadLetter { .. }
        ));
        assert!(matches!(
            Resolution::decide(&failed(false), 1, 3, &backoff()),
            Resolution::DeadLetter { .. }
        ));
    }

    #[test]
    fn test_failure_without_summary_is_dead_lettered() {
        let mut result = failed(true);
        result.error_summary = None;
        assert_eq!(
            Resolution::decide(&result, 1, 3, &backoff()),
            Resolution::DeadLetter {
                reason: "failed without summary".to_string()
            }
        );
    }

    #[test]
    fn test_readiness_rules() {
        let now = Utc::now();
        let mut health = PoolContext::new(PoolSettings {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(30),
            claim_backoff: backoff(),
            retry_backoff: backoff(),
            max_attempts: 3,
            shutdown_timeout: Duration::from_secs(5),
            callback_timeout: Duration::from_secs(5),
            worker_prefix: "test".to_string(),
        })
        .health(false);
        assert!(!health.is_ready(Duration::from_secs(60), now));

        health.active_slots = 1;
        health.last_claim_at = Some(now - chrono::Duration::seconds(10));
        assert!(health.is_ready(Duration::from_secs(60), now));
        assert!(!health.is_ready(Duration::from_secs(5), now));

        health.busy_slots = 1;
        assert!(health.is_ready(Duration::from_secs(5), now));

        health.shutting_down = true;
        assert!(!health.is_ready(Duration::from_secs(60), now));
    }
}
