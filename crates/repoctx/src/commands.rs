//! Subcommand implementations

use crate::bootstrap;
use crate::signal::spawn_shutdown_listener;
use anyhow::Context;
use clap::Args;
use repoctx_config::ApplicationConfig;
use repoctx_data::{
    GitTokenRef, JobEnvelope, JobPayload, JobQueue, JobType, NewJob, run_migrations,
};
use repoctx_indexing::{PoolSettings, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the running worker logs pool health and queue depth
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Arguments for `repoctx enqueue`
#[derive(Args, Debug, Clone)]
pub struct EnqueueArgs {
    /// Repository path on the provider, e.g. `org/repo`
    #[arg(long)]
    pub path: String,

    /// Provider-side repository id
    #[arg(long)]
    pub repo_id: String,

    /// Owner of the resulting context
    #[arg(long)]
    pub user: String,

    #[arg(long, default_value = "main")]
    pub branch: String,

    #[arg(long, default_value = "github")]
    pub provider: String,

    /// Context to (re)build; a new id is generated when omitted
    #[arg(long)]
    pub context_id: Option<String>,

    /// Name of the worker-side credential for private repositories
    #[arg(long)]
    pub token_ref: Option<String>,

    #[arg(long, default_value = "analyze")]
    pub job_type: String,

    #[arg(long, default_value_t = 0)]
    pub priority: i32,

    /// Re-process even if the stored context is already at the fetched commit
    #[arg(long)]
    pub force: bool,
}

impl EnqueueArgs {
    /// Build and validate the queue message
    fn into_job(self) -> anyhow::Result<(String, NewJob)> {
        let job_type: JobType = self.job_type.parse()?;
        let context_id = self
            .context_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut payload = JobPayload {
            context_id: Some(context_id.clone()),
            repo_id: Some(self.repo_id),
            relative_path: Some(self.path),
            branch: Some(self.branch),
            git_provider: Some(self.provider),
            git_token: self.token_ref.map(GitTokenRef::new),
            user_id: Some(self.user),
            priority: Some(self.priority),
            ..JobPayload::default()
        };
        if self.force {
            payload.config = Some(repoctx_data::ConfigOverrides {
                force: true,
                ..Default::default()
            });
        }

        let envelope = JobEnvelope::new(job_type, payload);
        envelope
            .clone()
            .validate()
            .context("Refusing to enqueue an invalid job")?;
        let job = NewJob::from_envelope(&envelope)?.with_priority(self.priority);
        Ok((context_id, job))
    }
}

/// Run the worker pool until a shutdown signal arrives
pub async fn run(config: ApplicationConfig) -> anyhow::Result<()> {
    let pool = bootstrap::setup_database(&config).await?;
    let queue = bootstrap::setup_queue(&config, &pool);
    let store = bootstrap::setup_context_store(&pool);
    let processor = bootstrap::setup_processor(&config, store, Arc::clone(&queue))?;

    let workers = WorkerPool::start(queue, Arc::new(processor), PoolSettings::from_config(&config))?;
    let shutdown = workers.shutdown_handle();
    let listener = spawn_shutdown_listener(shutdown.clone())?;

    info!("Worker running; send SIGINT or SIGTERM to stop");

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    // The first tick completes immediately
    status.tick().await;
    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            _ = status.tick() => {
                let health = workers.health();
                match workers.queue_depth().await {
                    Ok(depth) => info!(
                        busy_slots = health.busy_slots,
                        active_slots = health.active_slots,
                        jobs_processed = health.jobs_processed,
                        queued = depth.queued,
                        leased = depth.leased,
                        dead_lettered = depth.dead_lettered,
                        "Worker status"
                    ),
                    Err(e) => warn!(error = %e, busy_slots = health.busy_slots, "Failed to read queue depth"),
                }
                if let Ok(jobs) = workers.in_flight().await {
                    for job in &jobs {
                        debug!(
                            message_id = %job.message_id,
                            attempt = job.attempt_count,
                            stage = job.stage.as_deref().unwrap_or("Claimed"),
                            claimed_by = ?job.claimed_by,
                            "In-flight job"
                        );
                    }
                }
            }
        }
    }

    let report = workers.stop().await;
    listener.abort();
    for failure in &report.slot_failures {
        warn!(error = %failure, "Worker slot failed");
    }
    info!(
        drained = report.drained,
        aborted_slots = report.aborted_slots,
        jobs_processed = report.health.jobs_processed,
        jobs_succeeded = report.health.jobs_succeeded,
        jobs_failed = report.health.jobs_failed,
        jobs_dead_lettered = report.health.jobs_dead_lettered,
        "Worker stopped"
    );
    pool.close().await;
    Ok(())
}

pub async fn enqueue(config: &ApplicationConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let (context_id, job) = args.into_job()?;
    let pool = bootstrap::setup_database(config).await?;
    let queue = bootstrap::setup_producer_queue(config, &pool)?;

    let message_id = queue.enqueue(job).await?;
    info!(%message_id, %context_id, "Job enqueued");
    println!(
        "{}",
        serde_json::json!({ "message_id": message_id, "context_id": context_id })
    );
    Ok(())
}

pub async fn migrate(config: &ApplicationConfig) -> anyhow::Result<()> {
    let mut database = config.database.clone();
    // Migrations run explicitly below
    database.auto_migrate = false;
    let pool = repoctx_data::connect_with_retry(&database, 1, Duration::ZERO).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn depth(config: &ApplicationConfig) -> anyhow::Result<()> {
    let pool = bootstrap::setup_database(config).await?;
    let queue = bootstrap::setup_producer_queue(config, &pool)?;
    let depth = queue.depth().await?;
    let in_flight = queue.in_flight().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "depth": depth,
            "in_flight": in_flight,
        }))?
    );
    Ok(())
}

pub async fn scope(config: &ApplicationConfig, user_id: &str) -> anyhow::Result<()> {
    let pool = bootstrap::setup_database(config).await?;
    let store = bootstrap::setup_context_store(&pool);
    let mut repo_ids: Vec<String> = store.job_auth_scope(user_id).await?.into_iter().collect();
    repo_ids.sort();
    println!(
        "{}",
        serde_json::json!({ "user_id": user_id, "repo_ids": repo_ids })
    );
    Ok(())
}
