//! The cluster inventory ("source of truth") CSV file.
//!
//! The inventory has a mandatory header row. Columns are located by name, so
//! their order is free and extra columns are carried along untouched:
//!
//! ```text
//! cluster_name,cluster_group,cluster_tags,platform_repository_revision,workload_repository_revision
//! cluster1,groupA,"tag1,tag2",v1,v1
//! ```
//!
//! - [`select_clusters`] picks the rows a rollout targets.
//! - [`update_revisions`] rewrites the revision columns of a batch's rows.

mod select;
mod update;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use select::{TagFilter, parse_tags, select_clusters};
pub use update::update_revisions;

pub const CLUSTER_NAME: &str = "cluster_name";
pub const CLUSTER_GROUP: &str = "cluster_group";
pub const CLUSTER_TAGS: &str = "cluster_tags";
pub const PLATFORM_REVISION: &str = "platform_repository_revision";
pub const WORKLOAD_REVISION: &str = "workload_repository_revision";

/// Required columns were absent from the header row.
///
/// `fields` lists every missing column in the order it was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsNotFoundError {
    pub fields: Vec<String>,
}

impl fmt::Display for FieldsNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fields {:?} not found in header", self.fields)
    }
}

impl std::error::Error for FieldsNotFoundError {}

/// Errors from reading or rewriting the inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("unable to read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error reading CSV records from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    FieldsNotFound(#[from] FieldsNotFoundError),

    #[error("unable to write inventory {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InventoryError {
    /// Returns true if the inventory file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            InventoryError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }

    /// Returns the missing columns, if this is a header error.
    pub fn missing_fields(&self) -> Option<&[String]> {
        match self {
            InventoryError::FieldsNotFound(e) => Some(&e.fields),
            _ => None,
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Locates `fields` in `header`, returning their column indices in request order.
///
/// Lookup is by exact name and takes the first matching column. Every missing
/// field is reported, so an empty header names all of them.
pub fn find_field_indices<S: AsRef<str>>(
    header: &[S],
    fields: &[&str],
) -> std::result::Result<Vec<usize>, FieldsNotFoundError> {
    let mut indices = Vec::with_capacity(fields.len());
    let mut missing = Vec::new();

    for field in fields {
        match header.iter().position(|h| h.as_ref() == *field) {
            Some(i) => indices.push(i),
            None => missing.push((*field).to_string()),
        }
    }

    if missing.is_empty() {
        Ok(indices)
    } else {
        Err(FieldsNotFoundError { fields: missing })
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| InventoryError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [&str; 3] = [CLUSTER_NAME, CLUSTER_GROUP, CLUSTER_TAGS];

    #[test]
    fn finds_all_fields() {
        let indices = find_field_indices(&HEADER, &HEADER).unwrap();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn lookup_is_order_independent() {
        let indices = find_field_indices(&HEADER, &[CLUSTER_TAGS, CLUSTER_NAME]).unwrap();
        assert_eq!(indices, vec![2, 0]);
    }

    #[test]
    fn single_field() {
        assert_eq!(find_field_indices(&HEADER, &[CLUSTER_GROUP]).unwrap(), vec![1]);
    }

    #[test]
    fn missing_field_is_named() {
        let err = find_field_indices(&[CLUSTER_NAME, CLUSTER_GROUP], &HEADER).unwrap_err();
        assert_eq!(err.fields, vec![CLUSTER_TAGS]);
        assert_eq!(err.to_string(), r#"fields ["cluster_tags"] not found in header"#);
    }

    #[test]
    fn multiple_missing_fields_in_request_order() {
        let err = find_field_indices(&HEADER, &["region", "location", "province"]).unwrap_err();
        assert_eq!(err.fields, vec!["region", "location", "province"]);
    }

    #[test]
    fn empty_header_names_every_field() {
        let header: [&str; 0] = [];
        let err = find_field_indices(&header, &[CLUSTER_NAME, CLUSTER_TAGS]).unwrap_err();
        assert_eq!(err.fields, vec![CLUSTER_NAME, CLUSTER_TAGS]);
    }

    #[test]
    fn no_fields_requested() {
        assert!(find_field_indices(&HEADER, &[]).unwrap().is_empty());
    }

    #[test]
    fn first_duplicate_column_wins() {
        let header = [CLUSTER_NAME, CLUSTER_NAME];
        assert_eq!(find_field_indices(&header, &[CLUSTER_NAME]).unwrap(), vec![0]);
    }
}
