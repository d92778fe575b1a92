//! repoctx repository fetching
//!
//! Resolves a job's credential reference and `owner/repo` path through the
//! hosting provider, clones the requested branch into an exclusive per-job
//! workdir, and enumerates the text files worth chunking.

pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod files;
pub mod providers;
pub mod workdir;

pub use credentials::{CREDENTIAL_ENV_PREFIX, CredentialResolver, StaticCredentialResolver};
pub use error::{FetchError, FetchResult};
pub use fetcher::{GitRepositoryFetcher, SourceFetcher, Snapshot, clone_branch};
pub use files::{
    FailedFile, FileFilter, FileScan, IGNORED_DIRS, SkipReason, SourceFile, scan_files,
    scan_files_blocking,
};
pub use providers::{
    CloneCredentials, CloneTarget, GitHubProvider, GitLabProvider, GitProvider, ProviderRegistry,
    RepositoryMetadata, http_client,
};
pub use workdir::WorkDir;
