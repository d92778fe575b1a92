//! Job processor: one claimed job through fetch, chunk, embed and store
//!
//! `process` never returns an error. Every failure mode ends up in the
//! `ProcessingResult` with a `FailureKind` and a retryable flag, and the
//! worker pool decides between ack, nack and dead-letter from that alone.

use crate::error::{ErrorSummary, FailureKind, IndexingError, IndexingResult};
use crate::result::ProcessingResult;
use crate::stage::{Stage, StageTracker};
use async_trait::async_trait;
use repoctx_chunking::{Chunk, Chunker};
use repoctx_common::{CorrelationId, redact_secrets};
use repoctx_config::ApplicationConfig;
use repoctx_data::{ClaimedJob, GitTokenRef, JobQueue, JobSpec};
use repoctx_embeddings::EmbeddingService;
use repoctx_fetcher::{FailedFile, FileFilter, FileScan, SourceFetcher, WorkDir, scan_files_blocking};
use repoctx_vector_data::{
    ChunkRecord, ContextOwner, ContextState, ContextStatus, ContextStore, ReplaceContext,
    StoreError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Failed file paths listed in a partial-result summary before truncating
const MAX_LISTED_FAILURES: usize = 5;

/// Anything the worker pool can hand a claimed job to
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: &ClaimedJob) -> ProcessingResult;
}

/// Tunables for one processor instance
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub work_root: PathBuf,
    pub chunker: Chunker,
    pub file_filter: FileFilter,
    pub fetch_timeout: Duration,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
    pub skip_unchanged_commits: bool,
    /// Used only to decide whether a failure is final for status bookkeeping
    pub max_attempts: u32,
}

impl ProcessorSettings {
    /// # Errors
    /// Returns `IndexingError::Configuration` if the chunking parameters are invalid
    pub fn from_config(config: &ApplicationConfig) -> IndexingResult<Self> {
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)
            .map_err(|e| IndexingError::Configuration(e.to_string()))?;

        Ok(Self {
            work_root: config.fetch.work_dir.clone(),
            chunker,
            file_filter: FileFilter::from_config(&config.fetch),
            fetch_timeout: Duration::from_secs(config.worker.fetch_timeout_seconds),
            embed_timeout: Duration::from_secs(config.worker.embed_timeout_seconds),
            store_timeout: Duration::from_secs(config.worker.store_timeout_seconds),
            skip_unchanged_commits: config.fetch.skip_unchanged_commits,
            max_attempts: config.retry.max_attempts,
        })
    }
}

/// Counters gathered while the stages run, reported even on failure
#[derive(Debug, Default)]
struct Progress {
    files_processed: usize,
    files_skipped: usize,
    files_failed: usize,
    commit_sha: Option<String>,
}

enum Outcome {
    Written {
        chunks: usize,
        failed_files: Vec<FailedFile>,
    },
    Unchanged {
        chunks: usize,
    },
}

/// Everything one job needs after validation
struct JobContext<'a> {
    job: &'a ClaimedJob,
    spec: JobSpec,
    owner: ContextOwner,
    chunker: Chunker,
    correlation_id: CorrelationId,
    previous: Option<ContextState>,
}

impl JobContext<'_> {
    fn redact(&self, message: &str) -> String {
        redact_for(&self.spec, message)
    }
}

/// Strip the job's credential reference and any URL credentials from a message
///
/// Older producers put the raw token where the reference belongs.
fn redact_for(spec: &JobSpec, message: &str) -> String {
    let reference = spec
        .git_token_ref
        .as_ref()
        .map(GitTokenRef::as_str)
        .unwrap_or_default();
    redact_secrets(message, &[reference])
}

/// Orchestrates Fetcher, Chunker, Embedder and Store for one job
pub struct JobProcessor {
    fetcher: Arc<dyn SourceFetcher>,
    embeddings: Arc<dyn EmbeddingService>,
    store: Arc<dyn ContextStore>,
    settings: ProcessorSettings,
    stages: Option<Arc<dyn JobQueue>>,
}

impl JobProcessor {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        embeddings: Arc<dyn EmbeddingService>,
        store: Arc<dyn ContextStore>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            fetcher,
            embeddings,
            store,
            settings,
            stages: None,
        }
    }

    /// Persist every stage transition on the delivery's queue row
    #[must_use]
    pub fn with_stage_recorder(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.stages = Some(queue);
        self
    }

    pub const fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    async fn record_stage(&self, job: &ClaimedJob, stage: Stage) {
        let Some(queue) = &self.stages else {
            return;
        };
        match queue.record_stage(job.job_id, stage.as_str()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(
                    job_id = %job.job_id,
                    stage = %stage,
                    "Delivery no longer leased; stage not recorded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    stage = %stage,
                    error = %e,
                    "Failed to record job stage"
                );
            }
        }
    }

    async fn enter_stage(&self, tracker: &mut StageTracker, job: &ClaimedJob, stage: Stage) {
        tracker.enter(stage);
        self.record_stage(job, stage).await;
    }

    /// Parse the payload and check the job may write to its context
    async fn validate<'a>(&self, job: &'a ClaimedJob) -> Result<JobContext<'a>, ErrorSummary> {
        let spec = JobSpec::from_value(&job.payload)
            .map_err(|e| ErrorSummary::invalid_payload(e.to_string()))?;

        let chunker = Chunker::new(
            spec.config
                .chunk_size
                .unwrap_or_else(|| self.settings.chunker.chunk_size()),
            spec.config
                .chunk_overlap
                .unwrap_or_else(|| self.settings.chunker.chunk_overlap()),
        )
        .map_err(|e| ErrorSummary::invalid_payload(e.to_string()))?;

        // Ownership cannot be checked without the stored state
        let previous = self
            .store
            .context_state(&spec.context_id)
            .await
            .map_err(|e| {
                ErrorSummary::new(
                    FailureKind::StorageError,
                    redact_for(&spec, &e.to_string()),
                    e.is_retryable(),
                )
            })?;

        if let Some(state) = &previous {
            if state.user_id != spec.user_id || state.repo_id != spec.repo_id {
                return Err(ErrorSummary::invalid_payload(format!(
                    "context {} belongs to a different repository or user",
                    spec.context_id
                )));
            }
        }

        Ok(JobContext {
            job,
            owner: ContextOwner::new(&spec.repo_id, &spec.user_id),
            spec,
            chunker,
            correlation_id: CorrelationId::from(job.job_id),
            previous,
        })
    }

    async fn run_stages(
        &self,
        ctx: &JobContext<'_>,
        tracker: &mut StageTracker,
        progress: &mut Progress,
    ) -> Result<Outcome, ErrorSummary> {
        self.enter_stage(tracker, ctx.job, Stage::Workdir).await;
        let workdir = WorkDir::create(
            &self.settings.work_root,
            ctx.job.message_id,
            ctx.job.attempt_count,
        )
        .map_err(|e| ErrorSummary::new(FailureKind::FetchError, e.to_string(), e.is_retryable()))?;

        self.enter_stage(tracker, ctx.job, Stage::SourceFetch).await;
        let (commit_sha, scan) = self.fetch(ctx, &workdir).await?;
        progress.commit_sha.clone_from(&commit_sha);
        progress.files_processed = scan.files.len();
        progress.files_skipped = scan.skipped.len();
        progress.files_failed = scan.failed.len();

        if let Some(chunks) = self.unchanged_chunk_count(ctx, commit_sha.as_deref()) {
            tracing::info!(
                context_id = %ctx.spec.context_id,
                commit_sha = ?commit_sha,
                "Context already complete at this commit; skipping"
            );
            return Ok(Outcome::Unchanged { chunks });
        }

        self.enter_stage(tracker, ctx.job, Stage::Chunking).await;
        if scan.failed.len() > scan.files.len() {
            return Err(ErrorSummary::new(
                FailureKind::ChunkingError,
                format!(
                    "{} of {} files could not be read: {}",
                    scan.failed.len(),
                    scan.failed.len().saturating_add(scan.files.len()),
                    list_failures(&scan.failed)
                ),
                false,
            ));
        }
        let chunks: Vec<Chunk> = scan
            .files
            .iter()
            .flat_map(|file| ctx.chunker.split(&file.content, &file.path))
            .collect();
        drop(workdir);

        self.enter_stage(tracker, ctx.job, Stage::Embeddings).await;
        let vectors = self.embed(ctx, &chunks).await?;

        self.enter_stage(tracker, ctx.job, Stage::VectorStore).await;
        let written = self
            .persist(ctx, commit_sha, chunks, vectors, scan.files.len())
            .await?;

        Ok(Outcome::Written {
            chunks: written,
            failed_files: scan.failed,
        })
    }

    async fn fetch(
        &self,
        ctx: &JobContext<'_>,
        workdir: &WorkDir,
    ) -> Result<(Option<String>, FileScan), ErrorSummary> {
        let filter = ctx.spec.config.include_extensions.as_ref().map_or_else(
            || self.settings.file_filter.clone(),
            |extensions| self.settings.file_filter.clone().with_extensions(extensions),
        );

        let cancel = CancellationToken::new();
        let fetch = async {
            let snapshot = self.fetcher.fetch(&ctx.spec, workdir.path(), &cancel).await?;
            let scan = scan_files_blocking(snapshot.root.clone(), filter).await?;
            Ok::<_, repoctx_fetcher::FetchError>((snapshot.commit_sha, scan))
        };
        tokio::pin!(fetch);

        let fetched = tokio::select! {
            fetched = &mut fetch => fetched,
            () = tokio::time::sleep(self.settings.fetch_timeout) => {
                // The workdir outlives this call, so wait until nothing writes into it
                cancel.cancel();
                let _ = fetch.await;
                return Err(ErrorSummary::timeout(
                    Stage::SourceFetch,
                    self.settings.fetch_timeout,
                ));
            }
        };

        fetched.map_err(|e| {
            ErrorSummary::new(
                FailureKind::FetchError,
                ctx.redact(&e.to_string()),
                e.is_retryable(),
            )
        })
    }

    /// Stored chunk count when the context is already complete at `commit_sha`
    fn unchanged_chunk_count(&self, ctx: &JobContext<'_>, commit_sha: Option<&str>) -> Option<usize> {
        if !self.settings.skip_unchanged_commits || ctx.spec.config.force {
            return None;
        }
        let commit_sha = commit_sha?;
        ctx.previous
            .as_ref()
            .filter(|state| state.status == ContextStatus::Completed)
            .filter(|state| state.commit_sha.as_deref() == Some(commit_sha))
            .map(|state| state.chunk_count)
    }

    async fn embed(
        &self,
        ctx: &JobContext<'_>,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>, ErrorSummary> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.content.as_str()).collect();
        let vectors = match tokio::time::timeout(
            self.settings.embed_timeout,
            self.embeddings.generate_embeddings(texts),
        )
        .await
        {
            Err(_) => {
                return Err(ErrorSummary::timeout(
                    Stage::Embeddings,
                    self.settings.embed_timeout,
                ));
            }
            Ok(Err(e)) => {
                return Err(ErrorSummary::new(
                    FailureKind::EmbeddingError,
                    ctx.redact(&e.to_string()),
                    e.is_retryable(),
                ));
            }
            Ok(Ok(vectors)) => vectors,
        };

        if vectors.len() != chunks.len() {
            return Err(ErrorSummary::new(
                FailureKind::EmbeddingError,
                format!(
                    "embedding service returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
                false,
            ));
        }
        Ok(vectors)
    }

    async fn persist(
        &self,
        ctx: &JobContext<'_>,
        commit_sha: Option<String>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
        file_count: usize,
    ) -> Result<usize, ErrorSummary> {
        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkRecord { chunk, embedding })
            .collect();
        let replace = ReplaceContext {
            owner: ctx.owner.clone(),
            commit_sha,
            file_count,
            dimension: self.embeddings.provider().embedding_dimension(),
            records,
        };

        match tokio::time::timeout(
            self.settings.store_timeout,
            self.store
                .replace_context(&ctx.spec.context_id, replace, &ctx.correlation_id),
        )
        .await
        {
            Err(_) => Err(ErrorSummary::timeout(
                Stage::VectorStore,
                self.settings.store_timeout,
            )),
            Ok(Err(e @ StoreError::OwnerMismatch { .. })) => {
                Err(ErrorSummary::invalid_payload(e.to_string()))
            }
            Ok(Err(e)) => Err(ErrorSummary::new(
                FailureKind::StorageError,
                ctx.redact(&e.to_string()),
                e.is_retryable(),
            )),
            Ok(Ok(written)) => Ok(written),
        }
    }

    /// Best-effort status update; failures are logged and never change the outcome
    async fn mark(
        &self,
        ctx: &JobContext<'_>,
        status: ContextStatus,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .mark_context_status(
                &ctx.spec.context_id,
                &ctx.owner,
                status,
                error,
                &ctx.correlation_id,
            )
            .await
        {
            tracing::warn!(
                context_id = %ctx.spec.context_id,
                status = %status,
                error = %e,
                "Failed to record context status"
            );
        }
    }

    fn is_final_failure(&self, job: &ClaimedJob, summary: &ErrorSummary) -> bool {
        !summary.retryable || job.attempt_count >= self.settings.max_attempts
    }
}

#[async_trait]
impl JobHandler for JobProcessor {
    #[tracing::instrument(
        skip(self, job),
        fields(job_id = %job.job_id, message_id = %job.message_id, attempt = job.attempt_count)
    )]
    async fn process(&self, job: &ClaimedJob) -> ProcessingResult {
        let started = Instant::now();
        let mut tracker = StageTracker::new(job.job_id, job.attempt_count);
        self.record_stage(job, tracker.current()).await;

        let ctx = match self.validate(job).await {
            Ok(ctx) => ctx,
            Err(summary) => {
                tracing::warn!(error = %summary, "Rejecting job payload");
                self.enter_stage(&mut tracker, job, Stage::Finalize).await;
                let result =
                    ProcessingResult::failed(payload_context_id(job), summary, started.elapsed());
                record_metrics(&result);
                return result;
            }
        };
        tracker.set_context(&ctx.spec.context_id);
        self.mark(&ctx, ContextStatus::Processing, None).await;

        let mut progress = Progress::default();
        let outcome = self.run_stages(&ctx, &mut tracker, &mut progress).await;
        self.enter_stage(&mut tracker, job, Stage::Finalize).await;

        let context_id = ctx.spec.context_id.clone();
        let result = match outcome {
            Ok(Outcome::Written {
                chunks,
                failed_files,
            }) if failed_files.is_empty() => {
                ProcessingResult::succeeded(context_id, chunks, started.elapsed())
            }
            Ok(Outcome::Written {
                chunks,
                failed_files,
            }) => {
                let summary = ErrorSummary::new(
                    FailureKind::ChunkingError,
                    format!(
                        "{} files could not be read: {}",
                        failed_files.len(),
                        list_failures(&failed_files)
                    ),
                    false,
                );
                self.mark(&ctx, ContextStatus::Completed, Some(&summary.reason()))
                    .await;
                ProcessingResult::partial(context_id, chunks, summary, started.elapsed())
            }
            Ok(Outcome::Unchanged { chunks }) => {
                self.mark(&ctx, ContextStatus::Completed, None).await;
                ProcessingResult::succeeded(context_id, chunks, started.elapsed()).unchanged()
            }
            Err(summary) => {
                let status = if self.is_final_failure(job, &summary) {
                    ContextStatus::Failed
                } else {
                    ContextStatus::Pending
                };
                self.mark(&ctx, status, Some(&summary.reason())).await;
                ProcessingResult::failed(context_id, summary, started.elapsed())
            }
        }
        .with_files(
            progress.files_processed,
            progress.files_skipped,
            progress.files_failed,
        )
        .with_commit(progress.commit_sha);

        match &result.error_summary {
            Some(summary) => tracing::warn!(
                status = %result.status,
                kind = %summary.kind,
                retryable = summary.retryable,
                error = %summary.message,
                chunks_written = result.chunks_written,
                "Job finished with errors"
            ),
            None => tracing::info!(
                chunks_written = result.chunks_written,
                files_processed = result.files_processed,
                unchanged = result.unchanged,
                elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
                "Job succeeded"
            ),
        }
        record_metrics(&result);
        result
    }
}

/// Context id from a payload that failed validation, when one can be found
fn payload_context_id(job: &ClaimedJob) -> String {
    match job.payload.pointer("/payload/context_id") {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

fn list_failures(failed: &[FailedFile]) -> String {
    let mut listed: Vec<&str> = failed
        .iter()
        .take(MAX_LISTED_FAILURES)
        .map(|file| file.path.as_str())
        .collect();
    if failed.len() > MAX_LISTED_FAILURES {
        listed.push("...");
    }
    listed.join(", ")
}

fn record_metrics(result: &ProcessingResult) {
    let kind = result
        .error_summary
        .as_ref()
        .map_or("none", |summary| summary.kind.as_str());
    metrics::counter!(
        "repoctx_jobs_processed_total",
        "status" => result.status.as_str(),
        "failure_kind" => kind
    )
    .increment(1);
    metrics::histogram!("repoctx_job_duration_seconds").record(result.elapsed.as_secs_f64());
    metrics::counter!("repoctx_chunks_written_total")
        .increment(u64::try_from(result.chunks_written).unwrap_or(u64::MAX));
}
