//! Git hosting capability and the per-platform implementations
//!
//! A provider knows how to turn an `owner/repo` path plus an optional token
//! into something libgit2 can clone, and how to read basic repository
//! metadata from the hosting API. Providers are selected by the
//! `GitProviderKind` tag carried in the job payload.

mod github;
mod gitlab;

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

use crate::error::{FetchError, FetchResult};
use async_trait::async_trait;
use repoctx_config::FetchConfig;
use repoctx_data::{GitProviderKind, GitToken};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Longest error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Username/password pair handed to libgit2
#[derive(Clone)]
pub struct CloneCredentials {
    pub username: String,
    pub token: GitToken,
}

impl fmt::Debug for CloneCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneCredentials")
            .field("username", &self.username)
            .field("token", &self.token)
            .finish()
    }
}

/// Everything needed to clone one branch of a repository
#[derive(Debug, Clone)]
pub struct CloneTarget {
    /// Display name used in errors and logs (`owner/repo`)
    pub repository: String,
    /// Clone URL without embedded credentials
    pub url: String,
    pub branch: String,
    pub credentials: Option<CloneCredentials>,
}

/// Repository facts reported by the hosting API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub full_name: String,
    pub default_branch: String,
    pub html_url: String,
    pub clone_url: String,
    pub private: bool,
    pub language: Option<String>,
}

/// Hosting platform capability
#[async_trait]
pub trait GitProvider: Send + Sync {
    fn kind(&self) -> GitProviderKind;

    /// Confirm the repository is reachable with `token` and describe how to clone it
    async fn resolve_clone_target(
        &self,
        token: Option<&GitToken>,
        relative_path: &str,
        branch: &str,
    ) -> FetchResult<CloneTarget>;

    async fn repository_metadata(
        &self,
        token: Option<&GitToken>,
        relative_path: &str,
    ) -> FetchResult<RepositoryMetadata>;
}

/// Providers keyed by their payload tag
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<GitProviderKind, Arc<dyn GitProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// GitHub and GitLab providers pointed at the configured endpoints
    ///
    /// # Errors
    /// Returns `FetchError::Network` if an HTTP client cannot be built
    pub fn from_config(config: &FetchConfig, request_timeout: Duration) -> FetchResult<Self> {
        let client = http_client(request_timeout)?;
        Ok(Self::new()
            .with_provider(Arc::new(GitHubProvider::new(
                client.clone(),
                &config.github_api_url,
            )))
            .with_provider(Arc::new(GitLabProvider::new(client, &config.gitlab_url))))
    }

    /// Register a provider, replacing any existing one for the same kind
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn GitProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// # Errors
    /// Returns `FetchError::InvalidResponse` when no provider is registered for `kind`
    pub fn get(&self, kind: GitProviderKind) -> FetchResult<Arc<dyn GitProvider>> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            FetchError::InvalidResponse(format!("no git provider registered for {kind}"))
        })
    }
}

/// Shared HTTP client for hosting APIs
///
/// # Errors
/// Returns `FetchError::Network` if the client cannot be built
pub fn http_client(timeout: Duration) -> FetchResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("repoctx/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))
}

/// Turn a non-success API response into a classified error
async fn error_from_response(repository: &str, response: reqwest::Response) -> FetchError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    FetchError::from_status(
        repository,
        status,
        body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    )
}

/// Usable token, if any
fn usable_token(token: Option<&GitToken>) -> Option<&GitToken> {
    token.filter(|t| !t.is_blank())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dispatches_on_kind() {
        let registry =
            ProviderRegistry::from_config(&FetchConfig::default(), Duration::from_secs(5)).unwrap();

        assert_eq!(
            registry.get(GitProviderKind::GitHub).unwrap().kind(),
            GitProviderKind::GitHub
        );
        assert_eq!(
            registry.get(GitProviderKind::GitLab).unwrap().kind(),
            GitProviderKind::GitLab
        );
        assert!(ProviderRegistry::new().get(GitProviderKind::GitHub).is_err());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = CloneCredentials {
            username: "x-access-token".to_string(),
            token: GitToken::new("ghp_secret"),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("ghp_secret"));
    }
}
