//! Git workspaces: one cloned repository checked out at a branch.
//!
//! The orchestrator only sees the [`GitWorkspace`] trait. The production
//! implementation, [`CliWorkspace`], shells out to the `git` binary with an
//! isolated configuration and a per-command timeout; tests substitute an
//! in-memory fake.

mod workspace;

use std::future::Future;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use thiserror::Error;

use crate::types::{CommitIdentity, GitRepositoryRef};

pub use workspace::{CliWorkspace, CliWorkspaceFactory, DEFAULT_GIT_TIMEOUT};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command exited unsuccessfully.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Git command did not finish within its timeout and was killed.
    #[error("git command timed out after {timeout:?}: {command}")]
    TimedOut { command: String, timeout: Duration },

    /// IO error (spawning git, creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// A cloned repository the deployer mutates.
///
/// Every operation runs against [`root`](GitWorkspace::root). An empty
/// [`diff`](GitWorkspace::diff) summary means the working tree matches HEAD.
pub trait GitWorkspace: Send + Sync {
    /// The repository this workspace is a clone of.
    fn repository(&self) -> &GitRepositoryRef;

    /// Root directory of the working tree.
    fn root(&self) -> &Path;

    /// Clones the repository into [`root`](GitWorkspace::root) using `secret`.
    fn clone_repo(&self, secret: &str) -> impl Future<Output = GitResult<()>> + Send;

    /// Sets the committer identity for this repository.
    fn configure(&self) -> impl Future<Output = GitResult<()>> + Send;

    /// Switches to `branch`, creating it from the current position if absent.
    fn checkout_branch(&self, branch: &str) -> impl Future<Output = GitResult<()>> + Send;

    /// Returns true if `branch` exists on the remote.
    fn branch_exists(&self, branch: &str) -> impl Future<Output = GitResult<bool>> + Send;

    /// Pulls `branch` from the remote into the current branch.
    fn pull(&self, branch: &str) -> impl Future<Output = GitResult<()>> + Send;

    /// Summarizes working-tree changes relative to HEAD.
    fn diff(&self) -> impl Future<Output = GitResult<String>> + Send;

    /// Stages every change, including deletions and untracked files.
    fn stage_all(&self) -> impl Future<Output = GitResult<()>> + Send;

    /// Commits the staged changes.
    fn commit(&self, message: &str) -> impl Future<Output = GitResult<()>> + Send;

    /// Pushes `branch` to the remote.
    fn push(&self, branch: &str) -> impl Future<Output = GitResult<()>> + Send;
}

/// Creates workspaces for repositories.
pub trait WorkspaceFactory {
    type Workspace: GitWorkspace;

    fn open(&self, repo: &GitRepositoryRef, identity: &CommitIdentity) -> Self::Workspace;
}

/// Create a git Command with clean environment (no system/user config).
///
/// This keeps behavior identical across machines by ignoring system and user
/// git configuration (hooks, aliases, credential helpers, prompts).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Run a git command in `workdir`, killing it if it outlives `timeout`.
pub async fn run_git(workdir: &Path, args: &[&str], timeout: Duration) -> GitResult<Output> {
    run_git_redacted(workdir, args, timeout, None).await
}

/// Like [`run_git`], but replaces `secret` with `***` in any error text.
pub(crate) async fn run_git_redacted(
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
    secret: Option<&str>,
) -> GitResult<Output> {
    let redact = |text: String| match secret {
        Some(s) if !s.is_empty() => text.replace(s, "***"),
        _ => text,
    };
    let command = redact(format!("git {}", args.join(" ")));

    let mut cmd = tokio::process::Command::from(git_command(workdir));
    cmd.args(args).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => return Err(GitError::TimedOut { command, timeout }),
    };

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = redact(String::from_utf8_lossy(&output.stderr).to_string());
        Err(GitError::CommandFailed { command, stderr })
    }
}
