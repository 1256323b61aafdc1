//! Core value types for the deployer.
//!
//! Repository identity, commit identity and the batching model shared by the
//! inventory, git and orchestration layers.

pub mod batch;
pub mod ids;

pub use batch::{Batch, effective_batch_size, partition};
pub use ids::{CommitIdentity, GitRepositoryRef, InvalidRepoRef, PrNumber};
