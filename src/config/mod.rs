//! Run parameters for a single deploy.
//!
//! Everything is read from environment variables set by the delivery
//! platform. [`DeployConfig::from_lookup`] takes the lookup as a closure so
//! tests can drive it from a map; [`DeployConfig::from_env`] reads the real
//! process environment.

mod duration;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{CommitIdentity, GitRepositoryRef, InvalidRepoRef};

pub use duration::{DurationParseError, parse_duration};

pub const GIT_SOURCE_REPO: &str = "CLOUD_DEPLOY_customTarget_gitSourceRepo";
pub const GIT_SOURCE_BRANCH: &str = "CLOUD_DEPLOY_customTarget_gitSourceBranch";
pub const GIT_OUTPUT_REPO: &str = "CLOUD_DEPLOY_customTarget_gitOutputRepo";
pub const GIT_OUTPUT_BRANCH: &str = "CLOUD_DEPLOY_customTarget_gitOutputBranch";
pub const GIT_SECRET: &str = "CLOUD_DEPLOY_customTarget_gitSecret";
pub const GIT_USERNAME: &str = "CLOUD_DEPLOY_customTarget_gitUsername";
pub const GIT_EMAIL: &str = "CLOUD_DEPLOY_customTarget_gitEmail";
pub const GIT_COMMIT_MESSAGE: &str = "CLOUD_DEPLOY_customTarget_gitCommitMessage";
pub const GIT_PULL_REQUEST_TITLE: &str = "CLOUD_DEPLOY_customTarget_gitPullRequestTitle";
pub const GIT_PULL_REQUEST_BODY: &str = "CLOUD_DEPLOY_customTarget_gitPullRequestBody";
pub const GIT_ENABLE_PULL_REQUEST_MERGE: &str =
    "CLOUD_DEPLOY_customTarget_gitEnablePullRequestMerge";
pub const HYDRATION_CLUSTER_GROUP: &str = "CLOUD_DEPLOY_customTarget_hydrationClusterGroup";
pub const HYDRATION_BATCH_SIZE: &str = "CLOUD_DEPLOY_customTarget_hydrationBatchSize";
pub const HYDRATION_WAIT_TIME: &str = "CLOUD_DEPLOY_customTarget_hydrationWaitTimeBetweenBatches";
pub const HYDRATION_SOURCE_OF_TRUTH: &str = "CLOUD_DEPLOY_customTarget_hydrationSourceOfTruth";
pub const HYDRATION_BASE_DIR: &str = "CLOUD_DEPLOY_customTarget_hydrationBaseDir";
pub const HYDRATION_OVERLAY_DIR: &str = "CLOUD_DEPLOY_customTarget_hydrationOverlayDir";
pub const HYDRATION_OUTPUT_DIR: &str = "CLOUD_DEPLOY_customTarget_hydrationOutputDir";
pub const PLATFORM_REVISION: &str = "platform-revision";
pub const WORKLOAD_REVISION: &str = "workload-revision";
pub const MATCH_ANY_TAG: &str = "match-clusters-having-any-listed-tag";
pub const MATCH_ALL_TAGS: &str = "match-clusters-having-all-listed-tags";

pub const PROJECT: &str = "CLOUD_DEPLOY_PROJECT";
pub const LOCATION: &str = "CLOUD_DEPLOY_LOCATION";
pub const DELIVERY_PIPELINE: &str = "CLOUD_DEPLOY_DELIVERY_PIPELINE";
pub const TARGET: &str = "CLOUD_DEPLOY_TARGET";
pub const RELEASE: &str = "CLOUD_DEPLOY_RELEASE";
pub const ROLLOUT: &str = "CLOUD_DEPLOY_ROLLOUT";

pub const WORKDIR: &str = "GIT_DEPLOYER_WORKDIR";
pub const SECRETS_DIR: &str = "GIT_DEPLOYER_SECRETS_DIR";
pub const RESULTS_DIR: &str = "GIT_DEPLOYER_RESULTS_DIR";
pub const HYDRATE_BIN: &str = "GIT_DEPLOYER_HYDRATE_BIN";

pub const DEFAULT_USERNAME: &str = "Cloud Deploy";
pub const DEFAULT_WAIT_BETWEEN_BATCHES: Duration = Duration::from_secs(30);
pub const DEFAULT_SOURCE_OF_TRUTH: &str = "source_of_truth.csv";
pub const DEFAULT_BASE_DIR: &str = "base_library/";
pub const DEFAULT_OVERLAY_DIR: &str = "overlays/";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_RESULTS_DIR: &str = "results";
pub const DEFAULT_HYDRATE_BIN: &str = "hydrate";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parameter {0:?} is required")]
    Missing(&'static str),

    #[error("at least one of parameter \"platform-revision\" and \"workload-revision\" is required")]
    NoRevision,

    #[error("failed to parse parameter {key:?}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("parameter {key:?}: {source}")]
    InvalidRepo {
        key: &'static str,
        #[source]
        source: InvalidRepoRef,
    },
}

/// Identity of the rollout being executed.
///
/// These values only feed log lines, default commit messages, default
/// pull-request bodies and feature-branch names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    pub project: String,
    pub location: String,
    pub pipeline: String,
    pub target: String,
    pub release: String,
    pub rollout: String,
}

impl DeployRequest {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let request = DeployRequest {
            project: get(PROJECT),
            location: get(LOCATION),
            pipeline: get(DELIVERY_PIPELINE),
            target: get(TARGET),
            release: get(RELEASE),
            rollout: get(ROLLOUT),
        };
        if request.rollout.is_empty() {
            return Err(ConfigError::Missing(ROLLOUT));
        }
        Ok(request)
    }
}

/// Validated parameters for one deploy.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub source_repo: GitRepositoryRef,
    pub source_branch: String,
    pub output_repo: GitRepositoryRef,
    /// Destination branch for pull requests. `None` means push the feature
    /// branches only.
    pub output_branch: Option<String>,
    pub secret_id: String,
    pub identity: CommitIdentity,
    pub commit_message: Option<String>,
    pub pull_request_title: Option<String>,
    pub pull_request_body: Option<String>,
    pub merge_pull_request: bool,

    pub cluster_group: String,
    pub match_any_tags: Vec<String>,
    pub match_all_tags: Vec<String>,
    pub platform_revision: String,
    pub workload_revision: String,
    /// Clusters per batch; zero or negative means a single batch.
    pub batch_size: i64,
    pub wait_between_batches: Duration,

    /// Inventory file, relative to the source repository root.
    pub inventory_path: PathBuf,
    /// Renderer base library, relative to the source repository root.
    pub base_dir: PathBuf,
    /// Renderer overlays, relative to the source repository root.
    pub overlay_dir: PathBuf,
    /// Rendered output, relative to the output repository root.
    pub output_dir: PathBuf,

    /// Directory repositories are cloned into.
    pub workdir: PathBuf,
    /// Base directory for relative secret ids.
    pub secrets_dir: PathBuf,
    /// Directory results and artifacts are written to.
    pub results_dir: PathBuf,
    /// Renderer executable.
    pub hydrate_bin: PathBuf,
}

impl DeployConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, treating empty values as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let repo = |key: &'static str| -> Result<GitRepositoryRef, ConfigError> {
            GitRepositoryRef::parse(&required(key)?)
                .map_err(|source| ConfigError::InvalidRepo { key, source })
        };
        let path_or = |key: &str, default: &str| {
            PathBuf::from(get(key).unwrap_or_else(|| default.to_string()))
        };

        let batch_size = required(HYDRATION_BATCH_SIZE)?
            .trim()
            .parse::<i64>()
            .map_err(|e| ConfigError::Invalid {
                key: HYDRATION_BATCH_SIZE,
                reason: e.to_string(),
            })?;

        let wait_between_batches = match get(HYDRATION_WAIT_TIME) {
            Some(raw) => parse_duration(&raw).map_err(|e| ConfigError::Invalid {
                key: HYDRATION_WAIT_TIME,
                reason: e.to_string(),
            })?,
            None => DEFAULT_WAIT_BETWEEN_BATCHES,
        };

        let merge_pull_request = match lookup(GIT_ENABLE_PULL_REQUEST_MERGE) {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                key: GIT_ENABLE_PULL_REQUEST_MERGE,
                reason: format!("invalid boolean {raw:?}"),
            })?,
            None => false,
        };

        let config = DeployConfig {
            source_repo: repo(GIT_SOURCE_REPO)?,
            source_branch: required(GIT_SOURCE_BRANCH)?,
            output_repo: repo(GIT_OUTPUT_REPO)?,
            output_branch: get(GIT_OUTPUT_BRANCH),
            secret_id: required(GIT_SECRET)?,
            identity: CommitIdentity::new(
                get(GIT_USERNAME).unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                get(GIT_EMAIL).unwrap_or_default(),
            ),
            commit_message: get(GIT_COMMIT_MESSAGE),
            pull_request_title: get(GIT_PULL_REQUEST_TITLE),
            pull_request_body: get(GIT_PULL_REQUEST_BODY),
            merge_pull_request,

            cluster_group: required(HYDRATION_CLUSTER_GROUP)?,
            match_any_tags: parse_tag_list(get(MATCH_ANY_TAG).as_deref()),
            match_all_tags: parse_tag_list(get(MATCH_ALL_TAGS).as_deref()),
            platform_revision: get(PLATFORM_REVISION).unwrap_or_default(),
            workload_revision: get(WORKLOAD_REVISION).unwrap_or_default(),
            batch_size,
            wait_between_batches,

            inventory_path: path_or(HYDRATION_SOURCE_OF_TRUTH, DEFAULT_SOURCE_OF_TRUTH),
            base_dir: path_or(HYDRATION_BASE_DIR, DEFAULT_BASE_DIR),
            overlay_dir: path_or(HYDRATION_OVERLAY_DIR, DEFAULT_OVERLAY_DIR),
            output_dir: path_or(HYDRATION_OUTPUT_DIR, DEFAULT_OUTPUT_DIR),

            workdir: path_or(WORKDIR, "."),
            secrets_dir: path_or(SECRETS_DIR, "."),
            results_dir: path_or(RESULTS_DIR, DEFAULT_RESULTS_DIR),
            hydrate_bin: path_or(HYDRATE_BIN, DEFAULT_HYDRATE_BIN),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants a deploy relies on before mutating anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (GIT_SOURCE_BRANCH, &self.source_branch),
            (GIT_SECRET, &self.secret_id),
            (HYDRATION_CLUSTER_GROUP, &self.cluster_group),
        ];
        for (key, value) in required {
            if value.is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }
        if self.output_branch.as_deref() == Some("") {
            return Err(ConfigError::Invalid {
                key: GIT_OUTPUT_BRANCH,
                reason: "branch name is empty".to_string(),
            });
        }
        if self.platform_revision.is_empty() && self.workload_revision.is_empty() {
            return Err(ConfigError::NoRevision);
        }
        Ok(())
    }

    /// True when source and output refer to the same repository.
    pub fn is_unified(&self) -> bool {
        self.source_repo == self.output_repo
    }

    /// Branch the output workspace is based on.
    pub fn output_base_branch(&self) -> &str {
        self.output_branch.as_deref().unwrap_or(&self.source_branch)
    }

    pub fn commit_message_for(&self, request: &DeployRequest) -> String {
        self.commit_message.clone().unwrap_or_else(|| {
            format!(
                "Delivery Pipeline: {} Release: {} Rollout: {}",
                request.pipeline, request.release, request.rollout
            )
        })
    }

    pub fn pull_request_title_for(&self, feature_branch: &str) -> String {
        self.pull_request_title
            .clone()
            .unwrap_or_else(|| format!("[Rollout Manager]: {feature_branch}"))
    }

    pub fn pull_request_body_for(&self, request: &DeployRequest) -> String {
        self.pull_request_body.clone().unwrap_or_else(|| {
            format!(
                "Project: {}\nLocation: {}\nDelivery Pipeline: {}\nTarget: {}\nRelease: {}\nRollout: {}",
                request.project,
                request.location,
                request.pipeline,
                request.target,
                request.release,
                request.rollout
            )
        })
    }
}

/// Splits a comma-separated tag list, trimming entries and dropping empties.
pub fn parse_tag_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Parses the boolean spellings the delivery platform accepts.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        [
            (GIT_SOURCE_REPO, "github.com/acme/fleet"),
            (GIT_SOURCE_BRANCH, "main"),
            (GIT_OUTPUT_REPO, "github.com/acme/fleet"),
            (GIT_OUTPUT_BRANCH, "main"),
            (GIT_SECRET, "projects/p/secrets/git/versions/1"),
            (HYDRATION_CLUSTER_GROUP, "groupA"),
            (HYDRATION_BATCH_SIZE, "2"),
            (PLATFORM_REVISION, "v2"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<DeployConfig, ConfigError> {
        DeployConfig::from_lookup(|key| env.get(key).cloned())
    }

    // ─── Defaults ───

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.source_repo, GitRepositoryRef::new("github.com", "acme", "fleet"));
        assert!(config.is_unified());
        assert_eq!(config.output_branch.as_deref(), Some("main"));
        assert_eq!(config.identity.name, "Cloud Deploy");
        assert_eq!(config.identity.email, "");
        assert_eq!(config.wait_between_batches, Duration::from_secs(30));
        assert_eq!(config.inventory_path, PathBuf::from("source_of_truth.csv"));
        assert_eq!(config.base_dir, PathBuf::from("base_library/"));
        assert_eq!(config.overlay_dir, PathBuf::from("overlays/"));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.hydrate_bin, PathBuf::from("hydrate"));
        assert_eq!(config.results_dir, PathBuf::from("results"));
        assert!(!config.merge_pull_request);
        assert!(config.match_any_tags.is_empty());
        assert!(config.match_all_tags.is_empty());
        assert_eq!(config.workload_revision, "");
    }

    #[test]
    fn overrides_are_applied() {
        let mut env = base_env();
        env.insert(GIT_OUTPUT_REPO, "gitlab.example.com/acme/rendered".into());
        env.insert(GIT_USERNAME, "Bot".into());
        env.insert(GIT_EMAIL, "bot@example.com".into());
        env.insert(HYDRATION_WAIT_TIME, "1m30s".into());
        env.insert(GIT_ENABLE_PULL_REQUEST_MERGE, "true".into());
        env.insert(MATCH_ANY_TAG, " tag1, ,tag2 ".into());
        env.insert(MATCH_ALL_TAGS, "gpu".into());

        let config = load(&env).unwrap();

        assert!(!config.is_unified());
        assert_eq!(config.identity, CommitIdentity::new("Bot", "bot@example.com"));
        assert_eq!(config.wait_between_batches, Duration::from_secs(90));
        assert!(config.merge_pull_request);
        assert_eq!(config.match_any_tags, vec!["tag1", "tag2"]);
        assert_eq!(config.match_all_tags, vec!["gpu"]);
    }

    #[test]
    fn output_branch_is_optional() {
        let mut env = base_env();
        env.remove(GIT_OUTPUT_BRANCH);
        let config = load(&env).unwrap();
        assert_eq!(config.output_branch, None);
        assert_eq!(config.output_base_branch(), "main");
    }

    #[test]
    fn non_positive_batch_size_is_accepted() {
        let mut env = base_env();
        env.insert(HYDRATION_BATCH_SIZE, "-1".into());
        assert_eq!(load(&env).unwrap().batch_size, -1);
    }

    // ─── Errors ───

    #[test]
    fn each_required_parameter_is_reported() {
        for key in [
            GIT_SOURCE_REPO,
            GIT_SOURCE_BRANCH,
            GIT_OUTPUT_REPO,
            GIT_SECRET,
            HYDRATION_CLUSTER_GROUP,
            HYDRATION_BATCH_SIZE,
        ] {
            let mut env = base_env();
            env.remove(key);
            match load(&env) {
                Err(ConfigError::Missing(missing)) => assert_eq!(missing, key),
                other => panic!("expected Missing({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut env = base_env();
        env.insert(GIT_SECRET, String::new());
        assert!(matches!(load(&env), Err(ConfigError::Missing(GIT_SECRET))));
    }

    #[test]
    fn at_least_one_revision_required() {
        let mut env = base_env();
        env.remove(PLATFORM_REVISION);
        let err = load(&env).unwrap_err();
        assert!(matches!(err, ConfigError::NoRevision));
        assert_eq!(
            err.to_string(),
            r#"at least one of parameter "platform-revision" and "workload-revision" is required"#
        );

        env.insert(WORKLOAD_REVISION, "w1".into());
        assert_eq!(load(&env).unwrap().workload_revision, "w1");
    }

    #[test]
    fn malformed_repo_reference() {
        let mut env = base_env();
        env.insert(GIT_SOURCE_REPO, "acme/fleet".into());
        assert!(matches!(
            load(&env),
            Err(ConfigError::InvalidRepo { key: GIT_SOURCE_REPO, .. })
        ));
    }

    #[test]
    fn malformed_batch_size() {
        let mut env = base_env();
        env.insert(HYDRATION_BATCH_SIZE, "three".into());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key: HYDRATION_BATCH_SIZE, .. })
        ));
    }

    #[test]
    fn malformed_wait_time() {
        let mut env = base_env();
        env.insert(HYDRATION_WAIT_TIME, "soon".into());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key: HYDRATION_WAIT_TIME, .. })
        ));
    }

    #[test]
    fn malformed_merge_flag() {
        let mut env = base_env();
        env.insert(GIT_ENABLE_PULL_REQUEST_MERGE, "yes".into());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key: GIT_ENABLE_PULL_REQUEST_MERGE, .. })
        ));
    }

    #[test]
    fn set_but_empty_merge_flag_is_rejected() {
        let mut env = base_env();
        env.insert(GIT_ENABLE_PULL_REQUEST_MERGE, String::new());
        assert!(load(&env).is_err());
    }

    #[test]
    fn validate_catches_direct_construction_mistakes() {
        let mut config = load(&base_env()).unwrap();
        config.output_branch = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = load(&base_env()).unwrap();
        config.platform_revision.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoRevision)));
    }

    // ─── Message templates ───

    fn request() -> DeployRequest {
        DeployRequest {
            project: "proj".into(),
            location: "us-central1".into(),
            pipeline: "fleet".into(),
            target: "prod".into(),
            release: "rel-1".into(),
            rollout: "rel-1-to-prod-0001".into(),
        }
    }

    #[test]
    fn default_messages() {
        let config = load(&base_env()).unwrap();
        assert_eq!(
            config.commit_message_for(&request()),
            "Delivery Pipeline: fleet Release: rel-1 Rollout: rel-1-to-prod-0001"
        );
        assert_eq!(
            config.pull_request_title_for("r__1/2"),
            "[Rollout Manager]: r__1/2"
        );
        assert_eq!(
            config.pull_request_body_for(&request()),
            "Project: proj\nLocation: us-central1\nDelivery Pipeline: fleet\nTarget: prod\n\
             Release: rel-1\nRollout: rel-1-to-prod-0001"
        );
    }

    #[test]
    fn configured_messages_win() {
        let mut env = base_env();
        env.insert(GIT_COMMIT_MESSAGE, "msg".into());
        env.insert(GIT_PULL_REQUEST_TITLE, "title".into());
        env.insert(GIT_PULL_REQUEST_BODY, "body".into());
        let config = load(&env).unwrap();
        assert_eq!(config.commit_message_for(&request()), "msg");
        assert_eq!(config.pull_request_title_for("b"), "title");
        assert_eq!(config.pull_request_body_for(&request()), "body");
    }

    #[test]
    fn request_requires_rollout() {
        let env: HashMap<&str, String> = [(PROJECT, "p".to_string())].into_iter().collect();
        assert!(matches!(
            DeployRequest::from_lookup(|k| env.get(k).cloned()),
            Err(ConfigError::Missing(ROLLOUT))
        ));

        let env: HashMap<&str, String> = [(ROLLOUT, "r".to_string())].into_iter().collect();
        let req = DeployRequest::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(req.rollout, "r");
        assert_eq!(req.project, "");
    }

    #[test]
    fn bool_spellings() {
        for t in ["1", "t", "T", "true", "TRUE", "True"] {
            assert_eq!(parse_bool(t), Some(true), "{t}");
        }
        for f in ["0", "f", "F", "false", "FALSE", "False"] {
            assert_eq!(parse_bool(f), Some(false), "{f}");
        }
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn tag_list_parsing() {
        assert!(parse_tag_list(None).is_empty());
        assert!(parse_tag_list(Some(",,")).is_empty());
        assert_eq!(parse_tag_list(Some("a,b")), vec!["a", "b"]);
    }
}
