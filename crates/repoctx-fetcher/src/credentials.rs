//! Credential resolution for git providers
//!
//! Job payloads carry a [`GitTokenRef`], never the secret itself. The
//! fetcher asks a [`CredentialResolver`] for the token right before it
//! contacts the provider, so secrets stay out of the queue tables.

use crate::error::{FetchError, FetchResult};
use async_trait::async_trait;
use repoctx_data::{GitProviderKind, GitToken, GitTokenRef};
use std::collections::HashMap;

/// Environment variables named `REPOCTX_GIT_CREDENTIAL_<REF>` register a reference
pub const CREDENTIAL_ENV_PREFIX: &str = "REPOCTX_GIT_CREDENTIAL_";

/// Turns a payload's credential reference into a usable token
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// `Ok(None)` means clone anonymously
    async fn resolve(
        &self,
        user_id: &str,
        provider: GitProviderKind,
        token_ref: Option<&GitTokenRef>,
    ) -> FetchResult<Option<GitToken>>;
}

/// Fixed reference table, usually loaded from the environment
///
/// Jobs without a reference fall back to the provider's default token
/// (`GITHUB_TOKEN` / `GITLAB_TOKEN`), or an anonymous clone when unset.
#[derive(Clone, Default)]
pub struct StaticCredentialResolver {
    tokens: HashMap<String, GitToken>,
    defaults: HashMap<GitProviderKind, GitToken>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `REPOCTX_GIT_CREDENTIAL_*` variable plus the provider defaults
    pub fn from_env() -> Self {
        let mut resolver = Self::new();
        for (name, value) in std::env::vars() {
            if let Some(reference) = name.strip_prefix(CREDENTIAL_ENV_PREFIX) {
                resolver = resolver.with_token(reference, GitToken::new(value));
            }
        }
        for (kind, variable) in [
            (GitProviderKind::GitHub, "GITHUB_TOKEN"),
            (GitProviderKind::GitLab, "GITLAB_TOKEN"),
        ] {
            if let Ok(value) = std::env::var(variable) {
                resolver = resolver.with_default(kind, GitToken::new(value));
            }
        }
        tracing::info!(
            references = resolver.tokens.len(),
            provider_defaults = resolver.defaults.len(),
            "Loaded git credentials"
        );
        resolver
    }

    #[must_use]
    pub fn with_token(mut self, reference: &str, token: GitToken) -> Self {
        if !token.is_blank() {
            self.tokens.insert(normalize(reference), token);
        }
        self
    }

    #[must_use]
    pub fn with_default(mut self, provider: GitProviderKind, token: GitToken) -> Self {
        if !token.is_blank() {
            self.defaults.insert(provider, token);
        }
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(
        &self,
        user_id: &str,
        provider: GitProviderKind,
        token_ref: Option<&GitTokenRef>,
    ) -> FetchResult<Option<GitToken>> {
        let Some(reference) = token_ref else {
            return Ok(self.defaults.get(&provider).cloned());
        };

        self.tokens
            .get(&normalize(reference.as_str()))
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                FetchError::Credentials(format!(
                    "no {provider} credential registered for the reference given by user {user_id}"
                ))
            })
    }
}

/// `vault/acme-ci` and `VAULT_ACME_CI` name the same credential
fn normalize(reference: &str) -> String {
    reference
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
