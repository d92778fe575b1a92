//! GitHub REST API provider

use super::{
    CloneCredentials, CloneTarget, GitProvider, RepositoryMetadata, error_from_response,
    usable_token,
};
use crate::error::FetchResult;
use async_trait::async_trait;
use repoctx_data::{GitProviderKind, GitToken};
use reqwest::header::ACCEPT;
use serde::Deserialize;

/// Username GitHub expects alongside an installation or personal token
const TOKEN_USERNAME: &str = "x-access-token";

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
    default_branch: String,
    html_url: String,
    clone_url: String,
    #[serde(default)]
    private: bool,
    language: Option<String>,
}

/// Provider for github.com or a GitHub Enterprise API root
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubProvider {
    pub fn new(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::GitHub
    }

    async fn resolve_clone_target(
        &self,
        token: Option<&GitToken>,
        relative_path: &str,
        branch: &str,
    ) -> FetchResult<CloneTarget> {
        let metadata = self.repository_metadata(token, relative_path).await?;
        let branch = if branch.trim().is_empty() {
            metadata.default_branch
        } else {
            branch.to_string()
        };

        Ok(CloneTarget {
            repository: metadata.full_name,
            url: metadata.clone_url,
            branch,
            credentials: usable_token(token).map(|token| CloneCredentials {
                username: TOKEN_USERNAME.to_string(),
                token: token.clone(),
            }),
        })
    }

    #[tracing::instrument(skip(self, token))]
    async fn repository_metadata(
        &self,
        token: Option<&GitToken>,
        relative_path: &str,
    ) -> FetchResult<RepositoryMetadata> {
        let url = format!("{}/repos/{relative_path}", self.api_url);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = usable_token(token) {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(relative_path, response).await);
        }

        let repo: RepoResponse = response.json().await?;
        Ok(RepositoryMetadata {
            full_name: repo.full_name,
            default_branch: repo.default_branch,
            html_url: repo.html_url,
            clone_url: repo.clone_url,
            private: repo.private,
            language: repo.language,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::providers::http_client;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GitHubProvider {
        GitHubProvider::new(http_client(Duration::from_secs(5)).unwrap(), &server.uri())
    }

    #[tokio::test]
    async fn test_resolves_clone_target_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .and(header("authorization", "Bearer ghp_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "full_name": "acme/widgets",
                "default_branch": "trunk",
                "html_url": "https://github.com/acme/widgets",
                "clone_url": "https://github.com/acme/widgets.git",
                "private": true,
                "language": "Rust"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = GitToken::new("ghp_test");
        let target = provider(&server)
            .resolve_clone_target(Some(&token), "acme/widgets", "")
            .await
            .unwrap();

        assert_eq!(target.url, "https://github.com/acme/widgets.git");
        assert_eq!(target.branch, "trunk");
        let credentials = target.credentials.unwrap();
        assert_eq!(credentials.username, "x-access-token");
        assert_eq!(credentials.token.expose(), "ghp_test");
    }

    #[tokio::test]
    async fn test_missing_and_forbidden_are_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(path("/repos/acme/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;
        Mock::given(path("/repos/acme/secret"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Resource not accessible"))
            .mount(&server)
            .await;
        Mock::given(path("/repos/acme/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let github = provider(&server);

        let gone = github.repository_metadata(None, "acme/gone").await.unwrap_err();
        assert!(matches!(gone, FetchError::NotFound { .. }));
        assert!(!gone.is_retryable());

        let secret = github
            .repository_metadata(None, "acme/secret")
            .await
            .unwrap_err();
        assert!(matches!(secret, FetchError::Forbidden { .. }));

        let flaky = github
            .repository_metadata(None, "acme/flaky")
            .await
            .unwrap_err();
        assert!(flaky.is_retryable());
    }
}
