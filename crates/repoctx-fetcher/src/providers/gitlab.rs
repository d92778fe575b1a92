//! GitLab v4 API provider

use super::{
    CloneCredentials, CloneTarget, GitProvider, RepositoryMetadata, error_from_response,
    usable_token,
};
use crate::error::FetchResult;
use async_trait::async_trait;
use repoctx_data::{GitProviderKind, GitToken};
use serde::Deserialize;

/// Username GitLab accepts with a personal or OAuth access token
const TOKEN_USERNAME: &str = "oauth2";

#[derive(Deserialize)]
struct ProjectResponse {
    path_with_namespace: String,
    #[serde(default)]
    default_branch: Option<String>,
    web_url: String,
    http_url_to_repo: String,
    #[serde(default)]
    visibility: Option<String>,
}

/// Provider for gitlab.com or a self-hosted instance
#[derive(Debug, Clone)]
pub struct GitLabProvider {
    client: reqwest::Client,
    base_url: String,
}

impl GitLabProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GitProvider for GitLabProvider {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::GitLab
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
        // Project paths are addressed as a single URL-encoded id: acme%2Fwidgets
        let url = format!(
            "{}/api/v4/projects/{}",
            self.base_url,
            urlencoding::encode(relative_path)
        );
        let mut request = self.client.get(&url);
        if let Some(token) = usable_token(token) {
            request = request.header("PRIVATE-TOKEN", token.expose());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(relative_path, response).await);
        }

        let project: ProjectResponse = response.json().await?;
        Ok(RepositoryMetadata {
            full_name: project.path_with_namespace,
            default_branch: project.default_branch.unwrap_or_else(|| "main".to_string()),
            html_url: project.web_url,
            clone_url: project.http_url_to_repo,
            private: project.visibility.as_deref() == Some("private"),
            language: None,
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

    fn provider(server: &MockServer) -> GitLabProvider {
        GitLabProvider::new(http_client(Duration::from_secs(5)).unwrap(), &server.uri())
    }

    #[tokio::test]
    async fn test_project_path_is_encoded_and_token_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/group%2Fsub%2Fproject"))
            .and(header("private-token", "glpat-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path_with_namespace": "group/sub/project",
                "default_branch": "main",
                "web_url": "https://gitlab.com/group/sub/project",
                "http_url_to_repo": "https://gitlab.com/group/sub/project.git",
                "visibility": "private"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = GitToken::new("glpat-test");
        let target = provider(&server)
            .resolve_clone_target(Some(&token), "group/sub/project", "develop")
            .await
            .unwrap();

        assert_eq!(target.repository, "group/sub/project");
        assert_eq!(target.url, "https://gitlab.com/group/sub/project.git");
        assert_eq!(target.branch, "develop");
        assert_eq!(target.credentials.unwrap().username, "oauth2");
    }

    #[tokio::test]
    async fn test_unauthorized_is_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("401 Unauthorized"))
            .mount(&server)
            .await;

        let error = provider(&server)
            .repository_metadata(Some(&GitToken::new("expired")), "group/project")
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Forbidden { .. }));
        assert!(!error.is_retryable());
    }
}
