//! Git Deployer - batched GitOps rollouts for fleets of clusters.
//!
//! A deploy selects clusters from an inventory file kept in a git repository,
//! splits them into batches, and for each batch rewrites their revisions,
//! re-renders manifests, and publishes the change on its own feature branch
//! (optionally through a pull request).

pub mod config;
pub mod deploy;
pub mod git;
pub mod hydrate;
pub mod inventory;
pub mod persistence;
pub mod provider;
pub mod report;
pub mod secrets;
pub mod types;
