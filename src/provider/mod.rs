//! Pull-request providers.
//!
//! After a feature branch is pushed the deployer may open a pull (or merge)
//! request against the destination branch and optionally merge it straight
//! away. The hosting service is chosen from the repository hostname:
//!
//! - hostnames containing `github` use the GitHub REST API via octocrab
//! - hostnames containing `gitlab` use the GitLab v4 REST API via reqwest
//!
//! Each call is sent once and bounded by a per-request timeout.

mod error;
mod github;
mod gitlab;
mod timeout;

use std::future::Future;
use std::time::Duration;

use crate::types::{GitRepositoryRef, PrNumber};

pub use error::{ProviderApiError, ProviderErrorKind};
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use timeout::DEFAULT_REQUEST_TIMEOUT;

/// A pull request as returned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullRequest {
    pub number: PrNumber,
}

/// Opens and merges pull requests for one repository.
pub trait GitProvider: Send + Sync {
    fn open_pull_request(
        &self,
        from_branch: &str,
        to_branch: &str,
        title: &str,
        body: &str,
    ) -> impl Future<Output = Result<PullRequest, ProviderApiError>> + Send;

    fn merge_pull_request(
        &self,
        number: PrNumber,
    ) -> impl Future<Output = Result<(), ProviderApiError>> + Send;
}

/// Builds a provider for a repository, authenticated with `secret`.
pub trait ProviderFactory: Send + Sync {
    type Provider: GitProvider;

    fn create(
        &self,
        repo: &GitRepositoryRef,
        secret: &str,
    ) -> Result<Self::Provider, ProviderApiError>;
}

/// Hosting service behind a hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

impl ProviderKind {
    pub fn for_host(hostname: &str) -> Option<Self> {
        let host = hostname.to_ascii_lowercase();
        if host.contains("github") {
            Some(ProviderKind::GitHub)
        } else if host.contains("gitlab") {
            Some(ProviderKind::GitLab)
        } else {
            None
        }
    }

    /// REST API root for `hostname`.
    pub fn api_base(&self, hostname: &str) -> String {
        match self {
            ProviderKind::GitHub if hostname.eq_ignore_ascii_case("github.com") => {
                "https://api.github.com".to_string()
            }
            ProviderKind::GitHub => format!("https://{hostname}/api/v3"),
            ProviderKind::GitLab => format!("https://{hostname}/api/v4"),
        }
    }
}

/// Either supported provider.
#[derive(Debug)]
pub enum HostedProvider {
    GitHub(GitHubProvider),
    GitLab(GitLabProvider),
}

impl GitProvider for HostedProvider {
    async fn open_pull_request(
        &self,
        from_branch: &str,
        to_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, ProviderApiError> {
        match self {
            HostedProvider::GitHub(p) => {
                p.open_pull_request(from_branch, to_branch, title, body)
                    .await
            }
            HostedProvider::GitLab(p) => {
                p.open_pull_request(from_branch, to_branch, title, body)
                    .await
            }
        }
    }

    async fn merge_pull_request(&self, number: PrNumber) -> Result<(), ProviderApiError> {
        match self {
            HostedProvider::GitHub(p) => p.merge_pull_request(number).await,
            HostedProvider::GitLab(p) => p.merge_pull_request(number).await,
        }
    }
}

/// Selects a provider by hostname.
#[derive(Debug, Clone, Copy)]
pub struct HostedProviderFactory {
    /// Bound on each API request.
    pub timeout: Duration,
}

impl Default for HostedProviderFactory {
    fn default() -> Self {
        HostedProviderFactory {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProviderFactory for HostedProviderFactory {
    type Provider = HostedProvider;

    fn create(
        &self,
        repo: &GitRepositoryRef,
        secret: &str,
    ) -> Result<HostedProvider, ProviderApiError> {
        let kind = ProviderKind::for_host(&repo.hostname).ok_or_else(|| {
            ProviderApiError::permanent_without_source(format!(
                "unsupported git provider for host {:?}",
                repo.hostname
            ))
        })?;
        let api_base = kind.api_base(&repo.hostname);

        Ok(match kind {
            ProviderKind::GitHub => HostedProvider::GitHub(GitHubProvider::new(
                &api_base,
                repo.clone(),
                secret,
                self.timeout,
            )?),
            ProviderKind::GitLab => HostedProvider::GitLab(GitLabProvider::new(
                &api_base,
                repo.clone(),
                secret,
                self.timeout,
            )?),
        })
    }
}
