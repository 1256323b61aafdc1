//! GitLab merge requests through the v4 REST API.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ProviderApiError;
use super::timeout::bounded;
use super::{GitProvider, PullRequest};
use crate::types::{GitRepositoryRef, PrNumber};

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// A GitLab API client scoped to one project.
///
/// Merge requests are identified by their project-scoped `iid`, which is what
/// [`PrNumber`] carries for GitLab.
#[derive(Clone)]
pub struct GitLabProvider {
    client: Client,
    api_base: String,
    repo: GitRepositoryRef,
    token: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct CreateMergeRequest<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct CreatedMergeRequest {
    iid: u64,
}

#[derive(Deserialize)]
struct MergedMergeRequest {
    state: String,
}

impl GitLabProvider {
    pub fn new(
        api_base: &str,
        repo: GitRepositoryRef,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderApiError> {
        let client = Client::builder()
            .build()
            .map_err(ProviderApiError::from_reqwest)?;
        Ok(GitLabProvider {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
            token: token.to_string(),
            timeout,
        })
    }

    /// `<api>/projects/<owner>%2F<name>`; GitLab accepts the URL-encoded path
    /// in place of a numeric project id.
    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}%2F{}",
            self.api_base, self.repo.owner, self.repo.name
        )
    }
}

/// Turns a non-success response into a classified error.
async fn check(response: Response) -> Result<Response, ProviderApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderApiError::from_status(status.as_u16(), body))
}

impl GitProvider for GitLabProvider {
    async fn open_pull_request(
        &self,
        from_branch: &str,
        to_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, ProviderApiError> {
        let url = format!("{}/merge_requests", self.project_url());
        let request = CreateMergeRequest {
            source_branch: from_branch,
            target_branch: to_branch,
            title,
            description: body,
        };

        let created: CreatedMergeRequest = bounded(self.timeout, async {
            let response = self
                .client
                .post(&url)
                .header(TOKEN_HEADER, &self.token)
                .json(&request)
                .send()
                .await
                .map_err(ProviderApiError::from_reqwest)?;
            check(response)
                .await?
                .json::<CreatedMergeRequest>()
                .await
                .map_err(ProviderApiError::from_reqwest)
        })
        .await?;

        let number = PrNumber(created.iid);
        info!(repo = %self.repo, %number, from_branch, to_branch, "opened merge request");
        Ok(PullRequest { number })
    }

    async fn merge_pull_request(&self, number: PrNumber) -> Result<(), ProviderApiError> {
        let url = format!("{}/merge_requests/{}/merge", self.project_url(), number.0);

        let merged: MergedMergeRequest = bounded(self.timeout, async {
            let response = self
                .client
                .put(&url)
                .header(TOKEN_HEADER, &self.token)
                .send()
                .await
                .map_err(ProviderApiError::from_reqwest)?;
            check(response)
                .await?
                .json::<MergedMergeRequest>()
                .await
                .map_err(ProviderApiError::from_reqwest)
        })
        .await?;

        if merged.state != "merged" {
            return Err(ProviderApiError::permanent_without_source(format!(
                "merge request {} is {:?} after merge",
                number, merged.state
            )));
        }
        info!(repo = %self.repo, %number, "merged merge request");
        Ok(())
    }
}

impl std::fmt::Debug for GitLabProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabProvider")
            .field("api_base", &self.api_base)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}
