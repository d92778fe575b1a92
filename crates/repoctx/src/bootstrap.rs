//! Application bootstrap: database, queue and processor wiring

use anyhow::Context;
use repoctx_config::{ApplicationConfig, QueueBackend};
use repoctx_data::{InMemoryJobQueue, JobQueue, PostgresJobQueue};
use repoctx_embeddings::{DefaultEmbeddingService, HttpEmbeddingProvider};
use repoctx_fetcher::{GitRepositoryFetcher, ProviderRegistry, StaticCredentialResolver};
use repoctx_indexing::{JobProcessor, ProcessorSettings};
use repoctx_vector_data::{ContextStore, PostgresContextStore};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DB_CONNECT_ATTEMPTS: u32 = 10;
const DB_CONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connect to `PostgreSQL`, waiting for it to come up
///
/// Migrations run here when `database.auto_migrate` is set.
pub async fn setup_database(config: &ApplicationConfig) -> anyhow::Result<PgPool> {
    info!(
        target = %config.database.safe_connection_string(),
        auto_migrate = config.database.auto_migrate,
        "Connecting to database"
    );
    let pool = repoctx_data::connect_with_retry(
        &config.database,
        DB_CONNECT_ATTEMPTS,
        DB_CONNECT_DELAY,
    )
    .await
    .context("Failed to connect to database")?;
    info!("Database connection established");
    Ok(pool)
}

/// Build the job queue client for the configured backend
pub fn setup_queue(config: &ApplicationConfig, pool: &PgPool) -> Arc<dyn JobQueue> {
    match config.queue.backend {
        QueueBackend::Postgres => {
            info!(batch_size = config.queue.batch_size, "Using PostgreSQL job queue");
            Arc::new(PostgresJobQueue::new(pool.clone()).with_batch_size(config.queue.batch_size))
        }
        QueueBackend::Memory => {
            warn!("Using in-memory job queue; jobs are lost on exit and cannot be enqueued from outside this process");
            Arc::new(InMemoryJobQueue::new())
        }
    }
}

/// Producer-side queue access; only a shared backend can be reached from another process
pub fn setup_producer_queue(
    config: &ApplicationConfig,
    pool: &PgPool,
) -> anyhow::Result<PostgresJobQueue> {
    match config.queue.backend {
        QueueBackend::Postgres => {
            Ok(PostgresJobQueue::new(pool.clone()).with_batch_size(config.queue.batch_size))
        }
        QueueBackend::Memory => anyhow::bail!(
            "The in-memory queue only lives inside a running worker; set queue.backend = \"postgres\""
        ),
    }
}

pub fn setup_context_store(pool: &PgPool) -> Arc<dyn ContextStore> {
    Arc::new(PostgresContextStore::new(pool.clone()))
}

/// Wire fetcher, embedding service and context store into the job processor
///
/// Stage transitions are persisted through `queue`.
pub fn setup_processor(
    config: &ApplicationConfig,
    store: Arc<dyn ContextStore>,
    queue: Arc<dyn JobQueue>,
) -> anyhow::Result<JobProcessor> {
    info!(
        model = %config.embedding.model,
        dimension = config.embedding.dimension,
        "Initializing embedding provider"
    );
    let provider = HttpEmbeddingProvider::new(&config.embedding)
        .context("Failed to create embedding provider")?;
    let embeddings = DefaultEmbeddingService::from_config(Arc::new(provider), &config.embedding);

    let registry = ProviderRegistry::from_config(&config.fetch, config.embedding.request_timeout())
        .context("Failed to create git provider clients")?;
    let credentials = StaticCredentialResolver::from_env();
    let fetcher = GitRepositoryFetcher::new(registry, Arc::new(credentials));

    let settings = ProcessorSettings::from_config(config)?;
    info!(
        work_root = %settings.work_root.display(),
        skip_unchanged_commits = settings.skip_unchanged_commits,
        "Job processor ready"
    );

    Ok(JobProcessor::new(
        Arc::new(fetcher),
        Arc::new(embeddings),
        store,
        settings,
    )
    .with_stage_recorder(queue))
}
