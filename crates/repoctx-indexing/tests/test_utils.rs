//! Shared fakes for the processor and worker pool tests
//!
//! Not every test binary uses every helper.

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::Utc;
use repoctx_chunking::Chunker;
use repoctx_data::{ClaimedJob, JobQueue, JobSpec};
use repoctx_embeddings::{DefaultEmbeddingService, EmbeddingService, MockEmbeddingProvider};
use repoctx_fetcher::{FetchError, FetchResult, FileFilter, Snapshot, SourceFetcher};
use repoctx_indexing::{JobProcessor, ProcessorSettings};
use repoctx_vector_data::MockContextStore;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DIMENSION: usize = 8;
pub const CHUNK_SIZE: usize = 40;
pub const CHUNK_OVERLAP: usize = 10;
pub const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

/// Fetcher that writes a fixed file set into the workdir
#[derive(Clone)]
pub struct FakeFetcher {
    files: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    commit_sha: Option<String>,
    error: Option<FetchError>,
    delay: Option<Duration>,
    hang: bool,
    hang_exited: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(Vec::new())),
            commit_sha: Some(COMMIT.to_string()),
            error: None,
            delay: None,
            hang: false,
            hang_exited: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_file(self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.set_file(path, content);
        self
    }

    /// Add or replace a file for later fetches
    pub fn set_file(&self, path: &str, content: impl AsRef<[u8]>) {
        let mut files = self.files.lock().unwrap();
        files.retain(|(existing, _)| existing != path);
        files.push((path.to_string(), content.as_ref().to_vec()));
    }

    pub fn with_error(mut self, error: FetchError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keep writing into the workdir from a blocking thread until cancelled
    pub fn with_hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// The hanging writer thread noticed the cancel and returned
    pub fn hang_exited(&self) -> bool {
        self.hang_exited.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        spec: &JobSpec,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
        if self.hang {
            let root = workdir.join("repo");
            let cancel = cancel.clone();
            let exited = Arc::clone(&self.hang_exited);
            tokio::task::spawn_blocking(move || {
                let mut written = 0_u32;
                while !cancel.is_cancelled() {
                    std::fs::create_dir_all(&root).unwrap();
                    std::fs::write(root.join(format!("pack-{}", written % 4)), "x").unwrap();
                    written = written.wrapping_add(1);
                    std::thread::sleep(Duration::from_millis(5));
                }
                std::fs::remove_dir_all(&root).ok();
                exited.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();
            return Err(FetchError::Cancelled);
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let root = workdir.join("repo");
        let files = self.files.lock().unwrap().clone();
        for (path, content) in files {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap())?;
            std::fs::write(full, content)?;
        }
        std::fs::create_dir_all(&root)?;

        Ok(Snapshot {
            root,
            branch: spec.branch.clone(),
            commit_sha: self.commit_sha.clone(),
        })
    }
}

/// Everything a test needs to drive and inspect one processor
pub struct Harness {
    pub processor: Arc<JobProcessor>,
    pub fetcher: FakeFetcher,
    pub provider: MockEmbeddingProvider,
    pub store: MockContextStore,
    pub work_root: TempDir,
}

impl Harness {
    pub fn new(fetcher: FakeFetcher) -> Self {
        Self::with_parts(fetcher, MockEmbeddingProvider::new(DIMENSION), MockContextStore::new())
    }

    pub fn with_parts(
        fetcher: FakeFetcher,
        provider: MockEmbeddingProvider,
        store: MockContextStore,
    ) -> Self {
        let work_root = tempfile::tempdir().unwrap();
        let settings = settings(work_root.path());
        Self::build(fetcher, provider, store, work_root, settings)
    }

    pub fn build(
        fetcher: FakeFetcher,
        provider: MockEmbeddingProvider,
        store: MockContextStore,
        work_root: TempDir,
        settings: ProcessorSettings,
    ) -> Self {
        let embeddings: Arc<dyn EmbeddingService> = Arc::new(
            DefaultEmbeddingService::with_provider(Arc::new(provider.clone()), 4).with_retry(
                3,
                repoctx_common::backoff::Backoff::new(
                    Duration::from_millis(100),
                    Duration::from_secs(1),
                ),
            ),
        );
        let processor = Arc::new(JobProcessor::new(
            Arc::new(fetcher.clone()),
            embeddings,
            Arc::new(store.clone()),
            settings,
        ));

        Self {
            processor,
            fetcher,
            provider,
            store,
            work_root,
        }
    }

    /// Persist stage transitions through `queue`
    pub fn with_stage_recorder(mut self, queue: Arc<dyn JobQueue>) -> Self {
        let Ok(processor) = Arc::try_unwrap(self.processor) else {
            panic!("processor already shared");
        };
        self.processor = Arc::new(processor.with_stage_recorder(queue));
        self
    }

    /// Entries left behind under the work root
    pub fn leftover_workdirs(&self) -> usize {
        std::fs::read_dir(self.work_root.path()).map_or(0, Iterator::count)
    }
}

pub fn settings(work_root: &Path) -> ProcessorSettings {
    ProcessorSettings {
        work_root: work_root.to_path_buf(),
        chunker: Chunker::new(CHUNK_SIZE, CHUNK_OVERLAP).unwrap(),
        file_filter: FileFilter::new(1024 * 1024, Vec::<String>::new()),
        fetch_timeout: Duration::from_secs(60),
        embed_timeout: Duration::from_secs(60),
        store_timeout: Duration::from_secs(60),
        skip_unchanged_commits: true,
        max_attempts: 3,
    }
}

/// Queue message body for one context
pub fn payload(context_id: &str) -> Value {
    json!({
        "job_type": "analyze",
        "payload": {
            "context_id": context_id,
            "branch": "main",
            "repo_id": "1012348217",
            "user_id": "user-1",
            "git_provider": "github",
            "relative_path": "org/repo"
        }
    })
}

/// A first delivery of `payload`
pub fn claimed(payload: Value) -> ClaimedJob {
    claimed_attempt(payload, 1)
}

pub fn claimed_attempt(payload: Value, attempt_count: u32) -> ClaimedJob {
    ClaimedJob {
        job_id: Uuid::new_v4(),
        message_id: Uuid::new_v4(),
        job_type: "analyze".to_string(),
        payload,
        priority: 0,
        attempt_count,
        enqueued_at: Utc::now(),
        lease_expires_at: Utc::now() + chrono::Duration::minutes(30),
    }
}

/// Chunk count the configured chunker yields for `contents`
pub fn expected_chunks(contents: &[&str]) -> usize {
    let chunker = Chunker::new(CHUNK_SIZE, CHUNK_OVERLAP).unwrap();
    contents.iter().map(|content| chunker.count(content)).sum()
}

pub const LIB_RS: &str = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\npub fn sub(a: i32, b: i32) -> i32 {\n    a - b\n}\n";
pub const README_MD: &str = "# Demo\n\nA tiny repository used to exercise the ingestion pipeline end to end.\n";

/// The two-file repository used across scenarios
pub fn two_file_fetcher() -> FakeFetcher {
    FakeFetcher::new()
        .with_file("src/lib.rs", LIB_RS)
        .with_file("README.md", README_MD)
}
