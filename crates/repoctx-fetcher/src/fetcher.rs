//! Repository snapshot fetching
//!
//! `SourceFetcher` is the seam the job processor depends on. The production
//! implementation resolves the job's credential reference, asks the hosting
//! provider where to clone from, then runs a shallow single-branch libgit2
//! clone on the blocking pool. Cancelling the token stops the clone at its
//! next progress callback, and `fetch` only returns once the clone thread has
//! let go of the workdir.

use crate::credentials::CredentialResolver;
use crate::error::{FetchError, FetchResult};
use crate::providers::{CloneTarget, ProviderRegistry};
use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use repoctx_data::JobSpec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// A local checkout of one repository branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub root: PathBuf,
    pub branch: String,
    /// HEAD commit, when the source is a git checkout
    pub commit_sha: Option<String>,
}

/// Produces a local snapshot of the repository a job refers to
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Materialize the repository inside `workdir`
    ///
    /// Once `cancel` fires the fetch must stop writing into `workdir` before
    /// it returns.
    async fn fetch(
        &self,
        spec: &JobSpec,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult<Snapshot>;
}

/// Fetcher backed by the hosting APIs and libgit2
#[derive(Clone)]
pub struct GitRepositoryFetcher {
    providers: ProviderRegistry,
    credentials: Arc<dyn CredentialResolver>,
    depth: Option<i32>,
}

impl GitRepositoryFetcher {
    pub fn new(providers: ProviderRegistry, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            providers,
            credentials,
            depth: Some(1),
        }
    }

    /// Clone full history instead of the latest commit only
    #[must_use]
    pub const fn with_full_history(mut self) -> Self {
        self.depth = None;
        self
    }

    async fn clone_target(&self, spec: &JobSpec) -> FetchResult<CloneTarget> {
        let provider = self.providers.get(spec.git_provider)?;
        let token = self
            .credentials
            .resolve(&spec.user_id, spec.git_provider, spec.git_token_ref.as_ref())
            .await?;
        provider
            .resolve_clone_target(token.as_ref(), &spec.relative_path, &spec.branch)
            .await
    }
}

#[async_trait]
impl SourceFetcher for GitRepositoryFetcher {
    #[tracing::instrument(
        skip(self, spec, workdir, cancel),
        fields(repo = %spec.relative_path, branch = %spec.branch, provider = %spec.git_provider)
    )]
    async fn fetch(
        &self,
        spec: &JobSpec,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult<Snapshot> {
        let target = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            target = self.clone_target(spec) => target?,
        };

        let destination = workdir.join("repo");
        let depth = self.depth;
        let branch = target.branch.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let mut clone = tokio::task::spawn_blocking(move || {
            clone_branch(&target, &destination, depth, &flag).map(|sha| (sha, destination))
        });

        let joined = tokio::select! {
            joined = &mut clone => joined,
            () = cancel.cancelled() => {
                cancelled.store(true, Ordering::Relaxed);
                tracing::warn!("Fetch cancelled; waiting for the clone to stop");
                clone.await
            }
        };

        let (commit_sha, root) = joined.map_err(|e| FetchError::Task(e.to_string()))??;
        tracing::info!(commit_sha = %commit_sha, "Repository fetched");
        Ok(Snapshot {
            root,
            branch,
            commit_sha: Some(commit_sha),
        })
    }
}

/// Clone one branch of `target` into `destination` and return the HEAD sha
///
/// The clone aborts at the next transfer or sideband callback after
/// `cancelled` is set, and whatever it wrote is removed.
///
/// # Errors
/// Returns `FetchError::Cancelled` when stopped through `cancelled`, or a
/// classified `FetchError` for any libgit2 failure
pub fn clone_branch(
    target: &CloneTarget,
    destination: &Path,
    depth: Option<i32>,
    cancelled: &AtomicBool,
) -> FetchResult<String> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(FetchError::Cancelled);
    }

    let mut callbacks = RemoteCallbacks::new();
    if let Some(credentials) = target.credentials.clone() {
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext(&credentials.username, credentials.token.expose())
        });
    }
    callbacks.transfer_progress(|_| !cancelled.load(Ordering::Relaxed));
    callbacks.sideband_progress(|_| !cancelled.load(Ordering::Relaxed));

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);
    if let Some(depth) = depth {
        fetch_options.depth(depth);
    }

    let cloned = RepoBuilder::new()
        .branch(&target.branch)
        .fetch_options(fetch_options)
        .clone(&target.url, destination);

    if cancelled.load(Ordering::Relaxed) {
        discard_checkout(destination);
        return Err(FetchError::Cancelled);
    }
    let repository = cloned.map_err(|e| FetchError::from_git(&target.repository, &e))?;

    head_commit(&repository).map_err(|e| FetchError::from_git(&target.repository, &e))
}

fn discard_checkout(destination: &Path) {
    match std::fs::remove_dir_all(destination) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => tracing::warn!(
            path = %destination.display(),
            error = %e,
            "Failed to remove cancelled checkout"
        ),
        _ => {}
    }
}

fn head_commit(repository: &Repository) -> Result<String, git2::Error> {
    let commit = repository.head()?.peel_to_commit()?;
    Ok(commit.id().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialResolver;
    use crate::providers::{CloneTarget, GitProvider, RepositoryMetadata};
    use repoctx_data::{GitProviderKind, GitToken};
    use serde_json::json;

    /// Provider pointing every path at a local repository
    struct LocalProvider {
        url: String,
    }

    #[async_trait]
    impl GitProvider for LocalProvider {
        fn kind(&self) -> GitProviderKind {
            GitProviderKind::GitHub
        }

        async fn resolve_clone_target(
            &self,
            _token: Option<&GitToken>,
            relative_path: &str,
            branch: &str,
        ) -> FetchResult<CloneTarget> {
            Ok(CloneTarget {
                repository: relative_path.to_string(),
                url: self.url.clone(),
                branch: branch.to_string(),
                credentials: None,
            })
        }

        async fn repository_metadata(
            &self,
            _token: Option<&GitToken>,
            relative_path: &str,
        ) -> FetchResult<RepositoryMetadata> {
            Ok(RepositoryMetadata {
                full_name: relative_path.to_string(),
                default_branch: "main".to_string(),
                html_url: self.url.clone(),
                clone_url: self.url.clone(),
                private: false,
                language: None,
            })
        }
    }

    /// Create a repository with one commit on `main` and return its HEAD sha
    fn init_origin(path: &Path) -> String {
        let repo = Repository::init(path).unwrap();
        std::fs::write(path.join("lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("lib.rs")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("Test", "test@example.com").unwrap();
        let commit = repo
            .commit(Some("refs/heads/main"), &signature, &signature, "initial", &tree, &[])
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        commit.to_string()
    }

    fn spec(branch: &str) -> JobSpec {
        JobSpec::from_value(&json!({
            "job_type": "process",
            "payload": {
                "context_id": "ctx-1",
                "repo_id": "repo-1",
                "user_id": "user-1",
                "relative_path": "acme/widgets",
                "branch": branch,
                "git_provider": "github"
            }
        }))
        .unwrap()
    }

    fn fetcher_for(origin: &Path) -> GitRepositoryFetcher {
        let url = format!("file://{}", origin.display());
        GitRepositoryFetcher::new(
            ProviderRegistry::new().with_provider(Arc::new(LocalProvider { url })),
            Arc::new(StaticCredentialResolver::new()),
        )
        .with_full_history()
    }

    #[tokio::test]
    async fn test_clones_branch_and_reports_head() {
        let origin = tempfile::tempdir().unwrap();
        let head = init_origin(origin.path());
        let work = tempfile::tempdir().unwrap();

        let snapshot = fetcher_for(origin.path())
            .fetch(&spec("main"), work.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.commit_sha.as_deref(), Some(head.as_str()));
        assert_eq!(snapshot.branch, "main");
        assert!(snapshot.root.join("lib.rs").is_file());
        assert!(snapshot.root.starts_with(work.path()));
    }

    #[tokio::test]
    async fn test_missing_branch_is_not_retryable() {
        let origin = tempfile::tempdir().unwrap();
        init_origin(origin.path());
        let work = tempfile::tempdir().unwrap();

        let error = fetcher_for(origin.path())
            .fetch(&spec("does-not-exist"), work.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(!error.is_retryable(), "unexpected retryable error: {error}");
    }

    #[tokio::test]
    async fn test_unregistered_provider_fails_before_cloning() {
        let work = tempfile::tempdir().unwrap();
        let fetcher = GitRepositoryFetcher::new(
            ProviderRegistry::new(),
            Arc::new(StaticCredentialResolver::new()),
        );
        let error = fetcher
            .fetch(&spec("main"), work.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!error.is_retryable());
        assert!(!work.path().join("repo").exists());
    }

    #[tokio::test]
    async fn test_unresolvable_credential_fails_before_cloning() {
        let origin = tempfile::tempdir().unwrap();
        init_origin(origin.path());
        let work = tempfile::tempdir().unwrap();
        let mut job = spec("main");
        job.git_token_ref = Some(repoctx_data::GitTokenRef::new("unknown-ref"));

        let error = fetcher_for(origin.path())
            .fetch(&job, work.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::Credentials(_)));
        assert!(!work.path().join("repo").exists());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_no_checkout() {
        let origin = tempfile::tempdir().unwrap();
        init_origin(origin.path());
        let work = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = fetcher_for(origin.path())
            .fetch(&spec("main"), work.path(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::Cancelled));
        assert!(!work.path().join("repo").exists());
    }

    #[test]
    fn test_clone_stops_once_flagged() {
        let origin = tempfile::tempdir().unwrap();
        init_origin(origin.path());
        let work = tempfile::tempdir().unwrap();
        let destination = work.path().join("repo");
        let target = CloneTarget {
            repository: "acme/widgets".to_string(),
            url: format!("file://{}", origin.path().display()),
            branch: "main".to_string(),
            credentials: None,
        };

        let error = clone_branch(&target, &destination, None, &AtomicBool::new(true)).unwrap_err();

        assert!(matches!(error, FetchError::Cancelled));
        assert!(!destination.exists());

        let sha = clone_branch(&target, &destination, None, &AtomicBool::new(false)).unwrap();
        assert_eq!(sha.len(), 40);
        assert!(destination.join("lib.rs").is_file());
    }
}
