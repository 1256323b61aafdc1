//! Newtype wrappers for repository and pull request identifiers.
//!
//! These types keep a parsed repository reference apart from a free-form string
//! and make provider/workspace signatures self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A pull (or merge) request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// Error returned when a repository reference is not `host/owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid git repository reference: {0:?}")]
pub struct InvalidRepoRef(pub String);

/// Identity of a hosted git repository, parsed from `"host/owner/repo"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitRepositoryRef {
    pub hostname: String,
    pub owner: String,
    pub name: String,
}

impl GitRepositoryRef {
    pub fn new(
        hostname: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        GitRepositoryRef {
            hostname: hostname.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses a `host/owner/repo` reference.
    ///
    /// The reference must split on `/` into exactly three non-empty parts.
    pub fn parse(reference: &str) -> Result<Self, InvalidRepoRef> {
        let parts: Vec<&str> = reference.split('/').collect();
        match parts.as_slice() {
            [host, owner, name] if !host.is_empty() && !owner.is_empty() && !name.is_empty() => {
                Ok(GitRepositoryRef::new(*host, *owner, *name))
            }
            _ => Err(InvalidRepoRef(reference.to_string())),
        }
    }

    /// Returns `owner/name`, the form used by hosting APIs.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Returns the directory name used for this repository's local clone.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.owner, self.name)
    }
}

impl FromStr for GitRepositoryRef {
    type Err = InvalidRepoRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GitRepositoryRef::parse(s)
    }
}

impl fmt::Display for GitRepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.owner, self.name)
    }
}

/// Identity used for creating commits (`user.name` / `user.email`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    /// May be empty; git accepts an empty email when set explicitly.
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        CommitIdentity {
            name: name.into(),
            email: email.into(),
        }
    }
}
