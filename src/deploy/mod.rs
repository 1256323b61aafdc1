//! Batched rollout of revision changes through git.
//!
//! A deploy moves through these phases, stopping at the first error:
//!
//! ```text
//! Init → SecretFetched → SourceWorkspaceReady → [OutputWorkspaceReady]
//!      → ClustersSelected → Batch 1/n … Batch n/n → ArtifactUploaded
//! ```
//!
//! Each batch resets the workspaces onto a fresh feature branch, rewrites the
//! inventory rows of its clusters, re-renders the output directory, and then
//! commits, pushes and (optionally) opens and merges a pull request in each
//! distinct repository. Batches are separated by a wait that shutdown can
//! interrupt.
//!
//! [`Deployer::process`] wraps a deploy with the terminal result upload, which
//! is attempted whether or not the deploy succeeded.

mod error;
mod workspace_pair;


use std::future::Future;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DeployConfig, DeployRequest};
use crate::git::{GitWorkspace, WorkspaceFactory};
use crate::hydrate::{RenderInvocation, Renderer, hydrate};
use crate::inventory::{select_clusters, update_revisions};
use crate::provider::{GitProvider, ProviderFactory};
use crate::report::{DeployResult, INVENTORY_ARTIFACT, ResultStore};
use crate::secrets::{SecretSource, decode_secret};
use crate::types::{Batch, partition};

pub use error::{DeployError, DeployFailure, DeployPhase, ProcessError, PublishedBatch};
pub use workspace_pair::{WorkspacePair, WorkspaceRole};

/// The collaborators a deploy talks to.
pub struct DeployPorts<S, F, R, P, U> {
    pub secrets: S,
    pub workspaces: F,
    pub renderer: R,
    pub providers: P,
    pub results: U,
}

/// What a successful deploy produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// References to uploaded artifacts; the final inventory.
    pub artifacts: Vec<String>,
    pub published: Vec<PublishedBatch>,
}

#[derive(Debug)]
struct Progress {
    phase: DeployPhase,
    published: Vec<PublishedBatch>,
}

impl Progress {
    fn new() -> Self {
        Progress {
            phase: DeployPhase::Init,
            published: Vec::new(),
        }
    }

    fn enter(&mut self, phase: DeployPhase) {
        debug!(%phase, "entering phase");
        self.phase = phase;
    }
}

/// Runs one deploy against injected collaborators.
pub struct Deployer<S, F, R, P, U> {
    config: DeployConfig,
    request: DeployRequest,
    ports: DeployPorts<S, F, R, P, U>,
    shutdown: CancellationToken,
}

impl<S, F, R, P, U> Deployer<S, F, R, P, U>
where
    S: SecretSource,
    F: WorkspaceFactory,
    R: Renderer,
    P: ProviderFactory,
    U: ResultStore,
{
    pub fn new(
        config: DeployConfig,
        request: DeployRequest,
        ports: DeployPorts<S, F, R, P, U>,
        shutdown: CancellationToken,
    ) -> Self {
        Deployer {
            config,
            request,
            ports,
            shutdown,
        }
    }

    /// Deploys, then uploads the result.
    ///
    /// An upload failure is reported as [`ProcessError::Upload`], which still
    /// carries the deploy's own failure if there was one.
    pub async fn process(&self) -> Result<DeployOutcome, ProcessError> {
        let deployed = self.deploy().await;

        let result = match &deployed {
            Ok(outcome) => DeployResult::succeeded(outcome.artifacts.clone()),
            Err(failure) => DeployResult::failed(failure.to_string()),
        };
        let status = result.result_status;

        match self.ports.results.upload_result(&result).await {
            Ok(result_uri) => match deployed {
                Ok(outcome) => {
                    info!(%result_uri, batches = outcome.published.len(), "deploy succeeded");
                    Ok(outcome)
                }
                Err(failure) => {
                    error!(%result_uri, phase = %failure.phase, error = %failure, "deploy failed");
                    Err(ProcessError::DeployFailed {
                        failure: Box::new(failure),
                        result_uri,
                    })
                }
            },
            Err(source) => {
                error!(?status, error = %source, "unable to upload deploy result");
                Err(ProcessError::Upload {
                    status,
                    deploy_failure: deployed.err().map(Box::new),
                    source,
                })
            }
        }
    }

    /// Runs every phase of the deploy. No result is uploaded.
    #[instrument(skip(self), fields(rollout = %self.request.rollout))]
    pub async fn deploy(&self) -> Result<DeployOutcome, DeployFailure> {
        let mut progress = Progress::new();
        match self.run(&mut progress).await {
            Ok(artifacts) => Ok(DeployOutcome {
                artifacts,
                published: progress.published,
            }),
            Err(error) => Err(DeployFailure {
                phase: progress.phase,
                error,
                published: progress.published,
            }),
        }
    }

    async fn run(&self, progress: &mut Progress) -> Result<Vec<String>, DeployError> {
        self.checkpoint()?;
        self.config.validate()?;

        let secret_id = self.config.secret_id.as_str();
        let payload = self
            .step(self.ports.secrets.fetch_secret(secret_id), DeployError::Secret)
            .await?;
        let secret = decode_secret(secret_id, payload)?;
        progress.enter(DeployPhase::SecretFetched);

        let source = self
            .ports
            .workspaces
            .open(&self.config.source_repo, &self.config.identity);
        self.setup_workspace(&source, &secret, &self.config.source_branch)
            .await?;
        progress.enter(DeployPhase::SourceWorkspaceReady);

        let pair = if self.config.is_unified() {
            WorkspacePair::unified(source)
        } else {
            let output = self
                .ports
                .workspaces
                .open(&self.config.output_repo, &self.config.identity);
            self.setup_workspace(&output, &secret, self.config.output_base_branch())
                .await?;
            progress.enter(DeployPhase::OutputWorkspaceReady);
            WorkspacePair::split(source, output)
        };

        let inventory = self.inventory_path(&pair);
        self.checkpoint()?;
        let clusters = select_clusters(
            &inventory,
            &self.config.cluster_group,
            &self.config.match_any_tags,
            &self.config.match_all_tags,
        )
        .map_err(DeployError::Select)?;
        progress.enter(DeployPhase::ClustersSelected);

        let batches = partition(&clusters, self.config.batch_size);
        if batches.is_empty() {
            warn!(group = %self.config.cluster_group, "no clusters selected");
        } else {
            info!(
                clusters = clusters.len(),
                batches = batches.len(),
                "selected clusters"
            );
        }

        for batch in &batches {
            progress.enter(DeployPhase::Batch {
                index: batch.index,
                total: batch.total,
            });
            let branch = self.run_batch(&pair, &secret, batch).await?;
            progress.published.push(PublishedBatch {
                index: batch.index,
                total: batch.total,
                branch,
            });
            if !batch.is_last() {
                self.wait_between_batches().await?;
            }
        }

        let artifact = self
            .step(
                self.ports
                    .results
                    .upload_artifact(INVENTORY_ARTIFACT, &inventory),
                DeployError::Artifact,
            )
            .await?;
        progress.enter(DeployPhase::ArtifactUploaded);

        Ok(vec![artifact])
    }

    /// Runs one batch and returns its feature branch.
    #[instrument(skip(self, pair, secret, batch), fields(batch = %batch))]
    async fn run_batch(
        &self,
        pair: &WorkspacePair<F::Workspace>,
        secret: &str,
        batch: &Batch,
    ) -> Result<String, DeployError> {
        let branch = batch.feature_branch(&self.request.rollout);
        info!(%branch, "starting batch");

        for (role, workspace) in pair.distinct() {
            self.reset_workspace(workspace, self.base_branch(role), &branch)
                .await?;
        }

        self.checkpoint()?;
        update_revisions(
            &self.inventory_path(pair),
            &batch.clusters,
            &self.config.platform_revision,
            &self.config.workload_revision,
        )
        .map_err(DeployError::UpdateRevisions)?;

        let invocation = RenderInvocation::resolve(
            pair.source().root(),
            pair.output().root(),
            &self.config.base_dir,
            &self.config.overlay_dir,
            &self.config.output_dir,
            &self.config.inventory_path,
        );
        self.step(hydrate(&self.ports.renderer, &invocation), DeployError::Hydrate)
            .await?;

        for (_, workspace) in pair.distinct() {
            self.publish(workspace, secret, &branch).await?;
        }

        info!(%branch, "batch published");
        Ok(branch)
    }

    /// Clones `workspace`, sets its identity and checks out `branch`.
    #[instrument(skip(self, workspace, secret), fields(repo = %workspace.repository()))]
    async fn setup_workspace(
        &self,
        workspace: &F::Workspace,
        secret: &str,
        branch: &str,
    ) -> Result<(), DeployError> {
        let repo = workspace.repository();
        self.step(workspace.clone_repo(secret), |e| {
            DeployError::workspace(repo, "clone repository", e)
        })
        .await?;
        self.step(workspace.configure(), |e| {
            DeployError::workspace(repo, "configure repository", e)
        })
        .await?;
        self.checkout_and_pull(workspace, branch).await?;
        info!(%repo, branch, root = %workspace.root().display(), "workspace ready");
        Ok(())
    }

    /// Moves `workspace` onto `feature`, freshly based on the latest `base`.
    async fn reset_workspace(
        &self,
        workspace: &F::Workspace,
        base: &str,
        feature: &str,
    ) -> Result<(), DeployError> {
        let repo = workspace.repository();
        self.step(workspace.configure(), |e| {
            DeployError::workspace(repo, "configure repository", e)
        })
        .await?;
        self.checkout_and_pull(workspace, base).await?;
        self.checkout_and_pull(workspace, feature).await?;
        debug!(%repo, base, feature, "workspace reset");
        Ok(())
    }

    /// Checks out `branch`, creating it if needed, and pulls it if the remote
    /// has it.
    async fn checkout_and_pull(
        &self,
        workspace: &F::Workspace,
        branch: &str,
    ) -> Result<(), DeployError> {
        let repo = workspace.repository();
        self.step(workspace.checkout_branch(branch), |e| {
            DeployError::workspace(repo, format!("checkout branch {branch}"), e)
        })
        .await?;
        let exists = self
            .step(workspace.branch_exists(branch), |e| {
                DeployError::workspace(repo, format!("check remote branch {branch}"), e)
            })
            .await?;
        if exists {
            self.step(workspace.pull(branch), |e| {
                DeployError::workspace(repo, format!("pull branch {branch}"), e)
            })
            .await?;
        }
        Ok(())
    }

    /// Commits and pushes the batch in `workspace`, then handles the
    /// destination branch.
    async fn publish(
        &self,
        workspace: &F::Workspace,
        secret: &str,
        branch: &str,
    ) -> Result<(), DeployError> {
        let repo = workspace.repository();

        let diff = self
            .step(workspace.diff(), |e| DeployError::workspace(repo, "diff", e))
            .await?;
        if diff.is_empty() {
            return Err(DeployError::NoDiff {
                repo: repo.clone(),
                branch: branch.to_string(),
            });
        }
        debug!(%repo, changes = diff.lines().count(), "detected changes");

        self.step(workspace.stage_all(), |e| {
            DeployError::workspace(repo, "stage changes", e)
        })
        .await?;
        let message = self.config.commit_message_for(&self.request);
        self.step(workspace.commit(&message), |e| {
            DeployError::workspace(repo, "commit", e)
        })
        .await?;
        self.step(workspace.push(branch), |e| {
            DeployError::workspace(repo, format!("push branch {branch}"), e)
        })
        .await?;
        info!(%repo, branch, "pushed feature branch");

        let Some(destination) = self.config.output_branch.as_deref() else {
            return Ok(());
        };

        self.checkpoint()?;
        let provider = self
            .ports
            .providers
            .create(repo, secret)
            .map_err(|source| DeployError::ProviderSetup {
                repo: repo.clone(),
                source,
            })?;

        let title = self.config.pull_request_title_for(branch);
        let body = self.config.pull_request_body_for(&self.request);
        let pull_request = self
            .step(
                provider.open_pull_request(branch, destination, &title, &body),
                |source| DeployError::OpenPullRequest {
                    from: branch.to_string(),
                    to: destination.to_string(),
                    repo: repo.clone(),
                    source,
                },
            )
            .await?;

        if self.config.merge_pull_request {
            let number = pull_request.number;
            self.step(provider.merge_pull_request(number), |source| {
                DeployError::MergePullRequest {
                    number,
                    repo: repo.clone(),
                    source,
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Sleeps for the configured wait unless shutdown comes first.
    async fn wait_between_batches(&self) -> Result<(), DeployError> {
        let wait = self.config.wait_between_batches;
        if wait.is_zero() {
            return self.checkpoint();
        }
        info!(?wait, "waiting before next batch");
        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                warn!("shutdown requested while waiting between batches");
                Err(DeployError::Cancelled)
            }
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Runs `future` unless shutdown has been requested, abandoning it if
    /// shutdown arrives first.
    async fn step<T, E>(
        &self,
        future: impl Future<Output = Result<T, E>>,
        wrap: impl FnOnce(E) -> DeployError,
    ) -> Result<T, DeployError> {
        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                debug!("step interrupted by shutdown");
                Err(DeployError::Cancelled)
            }
            result = future => result.map_err(wrap),
        }
    }

    fn checkpoint(&self) -> Result<(), DeployError> {
        if self.shutdown.is_cancelled() {
            debug!("shutdown requested");
            return Err(DeployError::Cancelled);
        }
        Ok(())
    }

    fn base_branch(&self, role: WorkspaceRole) -> &str {
        match role {
            WorkspaceRole::Source => &self.config.source_branch,
            WorkspaceRole::Output => self.config.output_base_branch(),
        }
    }

    fn inventory_path(&self, pair: &WorkspacePair<F::Workspace>) -> PathBuf {
        pair.source().root().join(&self.config.inventory_path)
    }
}
