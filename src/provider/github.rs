//! GitHub pull requests through octocrab.

use std::time::Duration;

use octocrab::Octocrab;
use octocrab::service::middleware::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ProviderApiError;
use super::timeout::bounded;
use super::{GitProvider, PullRequest};
use crate::types::{GitRepositoryRef, PrNumber};

/// A GitHub API client scoped to one repository.
#[derive(Clone)]
pub struct GitHubProvider {
    client: Octocrab,
    repo: GitRepositoryRef,
    timeout: Duration,
}

#[derive(Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct CreatedPull {
    number: u64,
}

#[derive(Serialize)]
struct MergePull {
    merge_method: &'static str,
}

#[derive(Deserialize)]
struct MergeResponse {
    merged: bool,
    message: Option<String>,
}

impl GitHubProvider {
    /// Creates a token-authenticated client rooted at `api_base`.
    ///
    /// octocrab's own retry layer is switched off; every request is sent once.
    pub fn new(
        api_base: &str,
        repo: GitRepositoryRef,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderApiError> {
        let client = Octocrab::builder()
            .add_retry_config(RetryConfig::None)
            .personal_token(token.to_string())
            .base_uri(api_base)
            .and_then(|builder| builder.build())
            .map_err(ProviderApiError::from_octocrab)?;
        Ok(GitHubProvider {
            client,
            repo,
            timeout,
        })
    }

    fn pulls_route(&self) -> String {
        format!("/repos/{}/{}/pulls", self.repo.owner, self.repo.name)
    }
}

impl GitProvider for GitHubProvider {
    async fn open_pull_request(
        &self,
        from_branch: &str,
        to_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, ProviderApiError> {
        let request = CreatePull {
            title,
            head: from_branch,
            base: to_branch,
            body,
        };
        let created: CreatedPull = bounded(self.timeout, async {
            let response: CreatedPull = self
                .client
                .post(self.pulls_route(), Some(&request))
                .await
                .map_err(ProviderApiError::from_octocrab)?;
            Ok(response)
        })
        .await?;

        let number = PrNumber(created.number);
        info!(repo = %self.repo, %number, from_branch, to_branch, "opened pull request");
        Ok(PullRequest { number })
    }

    async fn merge_pull_request(&self, number: PrNumber) -> Result<(), ProviderApiError> {
        let route = format!("{}/{}/merge", self.pulls_route(), number.0);
        let request = MergePull {
            merge_method: "merge",
        };
        let response: MergeResponse = bounded(self.timeout, async {
            let response: MergeResponse = self
                .client
                .put(route, Some(&request))
                .await
                .map_err(ProviderApiError::from_octocrab)?;
            Ok(response)
        })
        .await?;

        if !response.merged {
            return Err(ProviderApiError::permanent_without_source(format!(
                "merge of pull request {} returned merged=false: {}",
                number,
                response.message.as_deref().unwrap_or("unknown reason")
            )));
        }
        info!(repo = %self.repo, %number, "merged pull request");
        Ok(())
    }
}

impl std::fmt::Debug for GitHubProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubProvider")
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}
