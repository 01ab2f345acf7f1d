use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{IoResultExt, Result};
use crate::hash::Hash;
use crate::object::list_objects;
use crate::refs::list_branches;
use crate::repo::Repo;
use crate::revision::RevisionGraph;

/// gc statistics
#[derive(Debug, Default)]
pub struct GcStats {
    pub commits_removed: usize,
    pub partitions_removed: usize,
    pub bytes_freed: u64,
}

/// remove commit and partition objects unreachable from any branch
///
/// the content store is never touched: it may be shared between repositories,
/// so an asset unreferenced here can still be live elsewhere.
pub fn gc(repo: &Repo, dry_run: bool) -> Result<GcStats> {
    // mark phase
    let graph = RevisionGraph::new(repo);
    let mut reachable_commits = HashSet::new();
    let mut reachable_partitions = HashSet::new();

    for branch in list_branches(repo)? {
        let tip = crate::refs::read_branch(repo, &branch)?;
        graph.walk(&tip, |hash, commit| {
            reachable_commits.insert(*hash);
            reachable_partitions.extend(commit.partitions.values().copied());
            Ok(true)
        })?;
    }

    // sweep phase
    let mut stats = GcStats::default();

    sweep_objects(
        &repo.commits_path(),
        &reachable_commits,
        dry_run,
        &mut stats.commits_removed,
        &mut stats.bytes_freed,
    )?;

    sweep_objects(
        &repo.partitions_path(),
        &reachable_partitions,
        dry_run,
        &mut stats.partitions_removed,
        &mut stats.bytes_freed,
    )?;

    tracing::info!(
        commits = stats.commits_removed,
        partitions = stats.partitions_removed,
        bytes = stats.bytes_freed,
        dry_run,
        "gc"
    );
    Ok(stats)
}

/// remove objects under `dir` that are not in the reachable set
fn sweep_objects(
    dir: &Path,
    reachable: &HashSet<Hash>,
    dry_run: bool,
    removed_count: &mut usize,
    bytes_freed: &mut u64,
) -> Result<()> {
    for hash in list_objects(dir)? {
        if reachable.contains(&hash) {
            continue;
        }

        let (prefix, rest) = hash.to_path_components();
        let path = dir.join(&prefix).join(rest);
        let meta = fs::metadata(&path).with_path(&path)?;
        *bytes_freed += meta.len();
        *removed_count += 1;

        if !dry_run {
            fs::remove_file(&path).with_path(&path)?;
            // drop the shard directory once empty
            let _ = fs::remove_dir(dir.join(prefix));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::SnapshotDelta;
    use crate::testutil::{self, Fixture};

    fn object_count(dir: &Path) -> usize {
        list_objects(dir).unwrap().len()
    }

    #[test]
    fn test_gc_keeps_reachable() {
        let fx = Fixture::new();
        testutil::commit_on(&fx, "a@b", SnapshotDelta::default()).unwrap();

        let stats = gc(&fx.repo, false).unwrap();

        assert_eq!(stats.commits_removed, 0);
        assert_eq!(stats.partitions_removed, 0);
        assert!(crate::ops::load_snapshot(&fx.repo, "a@a").is_ok());
    }

    #[test]
    fn test_gc_dry_run_then_sweep() {
        let fx = Fixture::new();
        testutil::commit_on(&fx, "b@b", SnapshotDelta::default()).unwrap();
        let commits_before = object_count(&fx.repo.commits_path());

        crate::refs::delete_branch(&fx.repo, "b").unwrap();

        let stats = gc(&fx.repo, true).unwrap();
        assert_eq!(stats.commits_removed, 1);
        assert!(stats.bytes_freed > 0);
        assert_eq!(object_count(&fx.repo.commits_path()), commits_before);

        let stats = gc(&fx.repo, false).unwrap();
        assert_eq!(stats.commits_removed, 1);
        assert_eq!(object_count(&fx.repo.commits_path()), commits_before - 1);
        assert!(crate::ops::load_snapshot(&fx.repo, "a").is_ok());
    }

    #[test]
    fn test_gc_never_touches_assets() {
        let fx = Fixture::new();
        let orphan = fx.repo.store().put(b"not referenced anywhere").unwrap();
        crate::refs::delete_branch(&fx.repo, "a").unwrap();

        gc(&fx.repo, false).unwrap();

        assert!(fx.repo.store().contains(&orphan));
        assert!(fx.repo.store().contains(&fx.d1));
        assert_eq!(object_count(&fx.repo.commits_path()), 0);
        assert_eq!(object_count(&fx.repo.partitions_path()), 0);
    }
}
