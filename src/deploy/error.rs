//! Deploy errors and the failure report built from them.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::git::GitError;
use crate::hydrate::HydrateError;
use crate::inventory::InventoryError;
use crate::provider::ProviderApiError;
use crate::report::{ResultStatus, UploadError};
use crate::secrets::SecretError;
use crate::types::{GitRepositoryRef, PrNumber};

/// Why a deploy stopped.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("unable to {op} in {repo}: {source}")]
    Workspace {
        repo: GitRepositoryRef,
        op: String,
        #[source]
        source: GitError,
    },

    #[error("unable to select clusters: {0}")]
    Select(#[source] InventoryError),

    #[error("unable to update revisions: {0}")]
    UpdateRevisions(#[source] InventoryError),

    #[error("unable to hydrate: {0}")]
    Hydrate(#[from] HydrateError),

    /// The working tree matched HEAD after hydration. Every batch is expected
    /// to change something, so this points at a misconfigured rollout.
    #[error("no diff detected in {repo} on branch {branch}")]
    NoDiff {
        repo: GitRepositoryRef,
        branch: String,
    },

    #[error("unable to create git provider for {repo}: {source}")]
    ProviderSetup {
        repo: GitRepositoryRef,
        #[source]
        source: ProviderApiError,
    },

    #[error("unable to open pull request from {from} to {to} in {repo}: {source}")]
    OpenPullRequest {
        from: String,
        to: String,
        repo: GitRepositoryRef,
        #[source]
        source: ProviderApiError,
    },

    #[error("unable to merge pull request {number} in {repo}: {source}")]
    MergePullRequest {
        number: PrNumber,
        repo: GitRepositoryRef,
        #[source]
        source: ProviderApiError,
    },

    #[error("unable to upload artifact: {0}")]
    Artifact(#[source] UploadError),

    #[error("deploy cancelled")]
    Cancelled,
}

impl DeployError {
    pub(crate) fn workspace(
        repo: &GitRepositoryRef,
        op: impl Into<String>,
        source: GitError,
    ) -> Self {
        DeployError::Workspace {
            repo: repo.clone(),
            op: op.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled)
    }
}

/// Where in the state machine a deploy was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Init,
    SecretFetched,
    SourceWorkspaceReady,
    OutputWorkspaceReady,
    ClustersSelected,
    Batch { index: usize, total: usize },
    ArtifactUploaded,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployPhase::Init => write!(f, "init"),
            DeployPhase::SecretFetched => write!(f, "secret fetched"),
            DeployPhase::SourceWorkspaceReady => write!(f, "source workspace ready"),
            DeployPhase::OutputWorkspaceReady => write!(f, "output workspace ready"),
            DeployPhase::ClustersSelected => write!(f, "clusters selected"),
            DeployPhase::Batch { index, total } => write!(f, "batch {index}/{total}"),
            DeployPhase::ArtifactUploaded => write!(f, "artifact uploaded"),
        }
    }
}

/// A batch whose feature branch was pushed (and pull request handled)
/// before the deploy stopped. Published batches are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedBatch {
    pub index: usize,
    pub total: usize,
    pub branch: String,
}

/// A failed deploy: the error, the last phase reached, and what had already
/// been published.
#[derive(Debug)]
pub struct DeployFailure {
    pub phase: DeployPhase,
    pub error: DeployError,
    pub published: Vec<PublishedBatch>,
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.published.is_empty() {
            let branches: Vec<&str> = self.published.iter().map(|b| b.branch.as_str()).collect();
            write!(f, " (already published: {})", branches.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for DeployFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of [`process`](super::Deployer::process) when it does not succeed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The deploy failed; the failure result was uploaded.
    #[error("deploy failed: {failure}")]
    DeployFailed {
        failure: Box<DeployFailure>,
        result_uri: String,
    },

    /// The result could not be uploaded. `deploy_failure` carries the deploy's
    /// own failure when there was one.
    #[error("unable to upload {status:?} result: {source}")]
    Upload {
        status: ResultStatus,
        deploy_failure: Option<Box<DeployFailure>>,
        #[source]
        source: UploadError,
    },
}

impl ProcessError {
    /// The deploy's own failure, if the deploy itself failed.
    pub fn deploy_failure(&self) -> Option<&DeployFailure> {
        match self {
            ProcessError::DeployFailed { failure, .. } => Some(failure),
            ProcessError::Upload { deploy_failure, .. } => deploy_failure.as_deref(),
        }
    }
}
