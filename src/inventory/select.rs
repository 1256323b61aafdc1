//! Cluster selection by group and tags.

use std::path::Path;

use tracing::debug;

use super::{
    CLUSTER_GROUP, CLUSTER_NAME, CLUSTER_TAGS, InventoryError, Result, find_field_indices,
    read_file, reader,
};

/// Tag-match policy for a rollout.
///
/// The lists are applied by precedence, not combined: a non-empty "any" list
/// wins over the "all" list, and with both empty every row in the group
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter<'a> {
    /// Row matches if it carries at least one of these tags.
    Any(&'a [String]),
    /// Row matches if it carries every one of these tags.
    All(&'a [String]),
    /// Every row matches.
    Everything,
}

impl<'a> TagFilter<'a> {
    pub fn new(match_any: &'a [String], match_all: &'a [String]) -> Self {
        if !match_any.is_empty() {
            TagFilter::Any(match_any)
        } else if !match_all.is_empty() {
            TagFilter::All(match_all)
        } else {
            TagFilter::Everything
        }
    }

    pub fn matches(&self, tags: &[&str]) -> bool {
        match self {
            TagFilter::Any(wanted) => tags.iter().any(|t| wanted.iter().any(|w| w == t)),
            TagFilter::All(wanted) => wanted.iter().all(|w| tags.contains(&w.as_str())),
            TagFilter::Everything => true,
        }
    }
}

/// Splits a `cluster_tags` cell into tags.
///
/// Surrounding quote characters and spaces are trimmed from the cell before
/// splitting on `,`; individual tags are not trimmed.
pub fn parse_tags(cell: &str) -> Vec<&str> {
    cell.trim_matches(|c| c == '"' || c == ' ').split(',').collect()
}

/// Returns the names of clusters in `cluster_group` that pass the tag filter.
///
/// Names come back in file row order and are never deduplicated. The header
/// must contain `cluster_name`, `cluster_group` and `cluster_tags`.
pub fn select_clusters(
    path: &Path,
    cluster_group: &str,
    match_any: &[String],
    match_all: &[String],
) -> Result<Vec<String>> {
    let bytes = read_file(path)?;
    let parse_err = |source| InventoryError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut records = reader(&bytes).into_records();
    let header = match records.next() {
        Some(record) => record.map_err(parse_err)?,
        None => csv::StringRecord::new(),
    };
    let header: Vec<&str> = header.iter().collect();
    let indices = find_field_indices(&header, &[CLUSTER_NAME, CLUSTER_GROUP, CLUSTER_TAGS])?;
    let (name_idx, group_idx, tags_idx) = (indices[0], indices[1], indices[2]);

    let filter = TagFilter::new(match_any, match_all);
    let mut selected = Vec::new();

    for record in records {
        let record = record.map_err(parse_err)?;
        if record.get(group_idx).unwrap_or_default() != cluster_group {
            continue;
        }

        let tags = parse_tags(record.get(tags_idx).unwrap_or_default());
        if filter.matches(&tags) {
            selected.push(record.get(name_idx).unwrap_or_default().to_string());
        }
    }

    debug!(
        path = %path.display(),
        cluster_group,
        ?filter,
        selected = selected.len(),
        "selected clusters from inventory"
    );
    Ok(selected)
}
