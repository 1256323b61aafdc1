//! The source and output workspaces of a deploy.
//!
//! When both refer to the same repository there is only one clone, and every
//! mutating step must run against it once. [`WorkspacePair::distinct`] yields
//! each clone exactly once, tagged with the role it plays.

use std::iter;

use crate::git::GitWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceRole {
    Source,
    Output,
}

#[derive(Debug)]
pub struct WorkspacePair<W> {
    source: W,
    output: Option<W>,
}

impl<W: GitWorkspace> WorkspacePair<W> {
    /// Source and output share one clone.
    pub fn unified(source: W) -> Self {
        WorkspacePair {
            source,
            output: None,
        }
    }

    pub fn split(source: W, output: W) -> Self {
        WorkspacePair {
            source,
            output: Some(output),
        }
    }

    pub fn is_unified(&self) -> bool {
        self.output.is_none()
    }

    pub fn source(&self) -> &W {
        &self.source
    }

    /// Where rendered manifests go; the source clone when unified.
    pub fn output(&self) -> &W {
        self.output.as_ref().unwrap_or(&self.source)
    }

    /// Each distinct clone once, source first.
    pub fn distinct(&self) -> impl Iterator<Item = (WorkspaceRole, &W)> {
        iter::once((WorkspaceRole::Source, &self.source))
            .chain(self.output.iter().map(|w| (WorkspaceRole::Output, w)))
    }
}
