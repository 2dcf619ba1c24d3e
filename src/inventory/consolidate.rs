//! Greedy consolidation of running-VM directories into shared ancestors.
//!
//! Directories are visited in lexicographic order and folded into the current
//! group while the group's running prefix stays deeper than the configured
//! guard. Grouping therefore follows alphabetical adjacency, not the directory
//! tree: two siblings separated in sort order by an unrelated directory end
//! up in different groups. The output is a display hint, so that limitation
//! is kept as-is.

use std::collections::BTreeSet;

use crate::inventory::prefix::{common_prefix, segment_count};

/// Depth guard used when nothing else is configured.
pub const DEFAULT_MIN_SHARED_SEGMENTS: usize = 2;

/// Merges directories into the minimal set of sufficiently deep ancestors.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryConsolidator {
    min_shared_segments: usize,
}

impl Default for DirectoryConsolidator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SHARED_SEGMENTS)
    }
}

impl DirectoryConsolidator {
    /// A shared prefix must have strictly more than `min_shared_segments`
    /// segments (root segment included) for two directories to merge.
    #[must_use]
    pub const fn new(min_shared_segments: usize) -> Self {
        Self {
            min_shared_segments,
        }
    }

    /// Consolidate `dirs` into ordered ancestor paths.
    pub fn consolidate<I, S>(&self, dirs: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sorted: BTreeSet<String> = dirs.into_iter().map(Into::into).collect();
        let mut iter = sorted.into_iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };

        // Only the running prefix of the open group matters; its members are
        // all descendants of it by construction.
        let mut consolidated = Vec::new();
        let mut group_prefix = first;

        for dir in iter {
            let shared = common_prefix(&group_prefix, &dir);
            if self.accepts(&shared) {
                group_prefix = shared;
            } else {
                consolidated.push(std::mem::replace(&mut group_prefix, dir));
            }
        }
        consolidated.push(group_prefix);
        consolidated
    }

    fn accepts(&self, shared: &str) -> bool {
        !shared.is_empty() && segment_count(shared) > self.min_shared_segments
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn consolidate(dirs: &[&str]) -> Vec<String> {
        DirectoryConsolidator::default().consolidate(dirs.iter().copied())
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(consolidate(&[]).is_empty());
    }

    #[test]
    fn single_directory_is_kept() {
        assert_eq!(consolidate(&["/storage/VMS/a"]), vec!["/storage/VMS/a"]);
    }

    #[test]
    fn merges_deep_siblings_and_keeps_shallow_outlier() {
        let out = consolidate(&[
            "/storage/500SDD/VMS/A",
            "/storage/900/C",
            "/storage/500SDD/VMS/B",
        ]);
        assert_eq!(out, vec!["/storage/500SDD/VMS", "/storage/900/C"]);
    }

    #[test]
    fn duplicates_collapse_before_grouping() {
        let out = consolidate(&["/vms/lab/a", "/vms/lab/a", "/vms/lab/a"]);
        assert_eq!(out, vec!["/vms/lab/a"]);
    }

    #[test]
    fn two_segment_prefix_does_not_merge() {
        // "/storage" is ["", "storage"]: two segments, not more than two.
        let out = consolidate(&["/storage/a", "/storage/b"]);
        assert_eq!(out, vec!["/storage/a", "/storage/b"]);
    }

    #[test]
    fn three_segment_prefix_merges() {
        let out = consolidate(&["/storage/500SDD/a", "/storage/500SDD/b"]);
        assert_eq!(out, vec!["/storage/500SDD"]);
    }

    #[test]
    fn running_prefix_shrinks_as_group_grows() {
        let out = consolidate(&["/data/vms/lab/a", "/data/vms/lab/b", "/data/vms/prod/c"]);
        assert_eq!(out, vec!["/data/vms"]);
    }

    #[test]
    fn alphabetical_gap_splits_hierarchical_siblings() {
        // "/data/vms/a" lives under "/data/vms", but '-' sorts before '/',
        // so "/data/vms-old/x" lands between them and breaks the group.
        let out = consolidate(&["/data/vms/a", "/data/vms", "/data/vms-old/x"]);
        assert_eq!(out, vec!["/data/vms", "/data/vms-old/x", "/data/vms/a"]);
    }

    #[test]
    fn threshold_is_configurable() {
        let strict = DirectoryConsolidator::new(3);
        let out = strict.consolidate(["/storage/500SDD/a", "/storage/500SDD/b"]);
        assert_eq!(out, vec!["/storage/500SDD/a", "/storage/500SDD/b"]);

        let loose = DirectoryConsolidator::new(1);
        let out = loose.consolidate(["/storage/a", "/storage/b"]);
        assert_eq!(out, vec!["/storage"]);
    }

    #[test]
    fn relative_directories_never_merge_through_empty_prefix() {
        let loose = DirectoryConsolidator::new(0);
        let out = loose.consolidate(["a/x", "b/y"]);
        assert_eq!(out, vec!["a/x", "b/y"]);
    }

    fn arb_dir() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(vec!["s", "t", "vms", "lab", "a", "b"]), 1..5)
            .prop_map(|parts| format!("/{}", parts.join("/")))
    }

    proptest! {
        #[test]
        fn output_is_bounded_and_covers_inputs(
            dirs in prop::collection::vec(arb_dir(), 0..12),
            guard in 0usize..4,
        ) {
            let distinct: BTreeSet<String> = dirs.iter().cloned().collect();
            let out = DirectoryConsolidator::new(guard).consolidate(dirs.clone());

            prop_assert!(out.len() <= distinct.len());
            for entry in &out {
                let covers_one = distinct.iter().any(|dir| {
                    dir == entry || dir.starts_with(&format!("{entry}/"))
                });
                prop_assert!(covers_one, "{entry} is not an ancestor of any input");
            }
            // Every input is covered by some output entry.
            for dir in &distinct {
                let covered = out.iter().any(|entry| {
                    dir == entry || dir.starts_with(&format!("{entry}/"))
                });
                prop_assert!(covered, "{dir} lost during consolidation");
            }
        }

        #[test]
        fn consolidation_is_deterministic(dirs in prop::collection::vec(arb_dir(), 0..12)) {
            let consolidator = DirectoryConsolidator::default();
            let mut reversed = dirs.clone();
            reversed.reverse();
            prop_assert_eq!(consolidator.consolidate(dirs), consolidator.consolidate(reversed));
        }
    }
}
