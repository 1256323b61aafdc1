//! Deploy results and where they are published.
//!
//! Every deploy ends by uploading a [`DeployResult`], whether it succeeded or
//! not, so the invoking pipeline always observes a terminal state. A
//! successful result also references the final inventory file, uploaded as an
//! artifact first.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::persistence::write_atomic;

pub const SOURCE_METADATA_KEY: &str = "custom-target-source";
pub const COMMIT_METADATA_KEY: &str = "custom-target-source-commit-sha";
pub const SOURCE_NAME: &str = "git-deployer";

/// Name the final inventory is published under.
pub const INVENTORY_ARTIFACT: &str = "source_of_truth.csv";

/// File the local store writes results to.
pub const RESULT_FILE: &str = "result.json";

/// Build revision of this binary, if it was provided at compile time.
pub fn build_commit() -> &'static str {
    option_env!("GIT_DEPLOYER_COMMIT_SHA").unwrap_or("unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Succeeded,
    Failed,
}

/// The payload reported back to the delivery platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub result_status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_files: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl DeployResult {
    pub fn succeeded(artifact_files: Vec<String>) -> Self {
        DeployResult {
            result_status: ResultStatus::Succeeded,
            failure_message: None,
            artifact_files,
            metadata: default_metadata(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        DeployResult {
            result_status: ResultStatus::Failed,
            failure_message: Some(message.into()),
            artifact_files: Vec::new(),
            metadata: default_metadata(),
        }
    }
}

fn default_metadata() -> BTreeMap<String, String> {
    BTreeMap::from([
        (SOURCE_METADATA_KEY.to_string(), SOURCE_NAME.to_string()),
        (COMMIT_METADATA_KEY.to_string(), build_commit().to_string()),
    ])
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to encode deploy result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for results and artifacts. Both calls return a reference
/// (URI) to what was stored.
pub trait ResultStore: Send + Sync {
    fn upload_artifact(
        &self,
        name: &str,
        local_path: &Path,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;

    fn upload_result(
        &self,
        result: &DeployResult,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}

/// Stores results under a local directory:
///
/// ```text
/// <dir>/result.json
/// <dir>/artifacts/<name>
/// ```
#[derive(Debug, Clone)]
pub struct LocalResultStore {
    dir: PathBuf,
}

impl LocalResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalResultStore { dir: dir.into() }
    }

    fn uri(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

impl ResultStore for LocalResultStore {
    async fn upload_artifact(&self, name: &str, local_path: &Path) -> Result<String, UploadError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| UploadError::Read {
                path: local_path.to_path_buf(),
                source,
            })?;
        let dest = self.dir.join("artifacts").join(name);
        write_atomic(&dest, &bytes).map_err(|source| UploadError::Write {
            path: dest.clone(),
            source,
        })?;
        info!(name, dest = %dest.display(), "uploaded artifact");
        Ok(Self::uri(&dest))
    }

    async fn upload_result(&self, result: &DeployResult) -> Result<String, UploadError> {
        let mut bytes = serde_json::to_vec_pretty(result)?;
        bytes.push(b'\n');
        let dest = self.dir.join(RESULT_FILE);
        write_atomic(&dest, &bytes).map_err(|source| UploadError::Write {
            path: dest.clone(),
            source,
        })?;
        info!(status = ?result.result_status, dest = %dest.display(), "uploaded deploy result");
        Ok(Self::uri(&dest))
    }
}
