//! Partitioning of selected clusters into rollout batches.
//!
//! Each batch is processed on its own feature branch named
//! `{rollout}__{index}/{total}`. Downstream tooling parses that name, so its
//! shape must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A non-empty, ordered chunk of cluster names processed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Cluster names in inventory order.
    pub clusters: Vec<String>,
    /// 1-based position of this batch.
    pub index: usize,
    /// Effective number of batches in the rollout.
    pub total: usize,
}

impl Batch {
    /// Returns the feature branch name for this batch.
    pub fn feature_branch(&self, rollout_id: &str) -> String {
        format!("{}__{}/{}", rollout_id, self.index, self.total)
    }

    pub fn is_last(&self) -> bool {
        self.index == self.total
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {}/{} [{}]",
            self.index,
            self.total,
            self.clusters.join(", ")
        )
    }
}

/// Returns the batch size actually used for a selection of `selected` clusters.
///
/// A configured size of zero or less means "everything in one batch".
pub fn effective_batch_size(configured: i64, selected: usize) -> usize {
    if configured > 0 {
        usize::try_from(configured).unwrap_or(usize::MAX)
    } else {
        selected
    }
}

/// Splits `clusters` into consecutive batches without reordering.
///
/// Both the chunk size and the stride use the effective batch size, so a
/// configured size of zero yields exactly one batch. An empty selection yields
/// no batches.
pub fn partition(clusters: &[String], configured_batch_size: i64) -> Vec<Batch> {
    if clusters.is_empty() {
        return Vec::new();
    }

    let size = effective_batch_size(configured_batch_size, clusters.len());
    let total = clusters.len().div_ceil(size);

    clusters
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            clusters: chunk.to_vec(),
            index: i + 1,
            total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cluster{i}")).collect()
    }

    #[test]
    fn ten_clusters_in_batches_of_three() {
        let clusters = names(10);
        let batches = partition(&clusters, 3);

        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].clusters, clusters[0..3]);
        assert_eq!(batches[1].clusters, clusters[3..6]);
        assert_eq!(batches[2].clusters, clusters[6..9]);
        assert_eq!(batches[3].clusters, clusters[9..10]);
        assert!(batches.iter().all(|b| b.total == 4));
        assert_eq!(
            batches.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn zero_batch_size_is_a_single_batch() {
        let clusters = names(7);
        let batches = partition(&clusters, 0);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].clusters, clusters);
        assert_eq!(batches[0].index, 1);
        assert_eq!(batches[0].total, 1);
    }

    #[test]
    fn negative_batch_size_is_a_single_batch() {
        let clusters = names(3);
        let batches = partition(&clusters, -5);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].clusters, clusters);
    }

    #[test]
    fn batch_size_larger_than_selection() {
        let clusters = names(2);
        let batches = partition(&clusters, 50);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total, 1);
    }

    #[test]
    fn empty_selection_has_no_batches() {
        assert!(partition(&[], 3).is_empty());
        assert!(partition(&[], 0).is_empty());
    }

    #[test]
    fn feature_branch_name_shape() {
        let batch = Batch {
            clusters: vec!["c1".to_string()],
            index: 2,
            total: 5,
        };
        assert_eq!(batch.feature_branch("rollout-001"), "rollout-001__2/5");
        assert!(!batch.is_last());
    }

    #[test]
    fn duplicate_names_are_kept() {
        let clusters = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let batches = partition(&clusters, 2);
        assert_eq!(batches[0].clusters, vec!["a", "a"]);
        assert_eq!(batches[1].clusters, vec!["b"]);
    }

    proptest! {
        #[test]
        fn batches_cover_selection_in_order(n in 0usize..200, size in -3i64..40) {
            let clusters = names(n);
            let batches = partition(&clusters, size);

            let flattened: Vec<String> =
                batches.iter().flat_map(|b| b.clusters.clone()).collect();
            prop_assert_eq!(&flattened, &clusters);

            let effective = effective_batch_size(size, n);
            for batch in &batches {
                prop_assert!(!batch.clusters.is_empty());
                prop_assert!(batch.clusters.len() <= effective);
                prop_assert_eq!(batch.total, batches.len());
                if !batch.is_last() {
                    prop_assert_eq!(batch.clusters.len(), effective);
                }
            }
        }

        #[test]
        fn batch_count_is_ceiling(n in 1usize..200, size in 1i64..40) {
            let batches = partition(&names(n), size);
            let expected = n.div_ceil(size as usize);
            prop_assert_eq!(batches.len(), expected);
        }
    }
}
