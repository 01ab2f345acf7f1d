//! full-history integrity check
//!
//! every commit reachable from a branch is read, every partition decoded and
//! the decoded snapshot checked: derived indices against a rebuild, annotation
//! digests against the metadata of the commit or its ancestors, class ids
//! against the label registry, asset digests against the content store.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::object::{list_objects, read_commit, read_partition};
use crate::refs::{list_branches, read_branch};
use crate::repo::Repo;
use crate::snapshot::Snapshot;
use crate::types::PartitionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    MissingObject,
    CorruptObject,
    /// commit lacks a partition or its payload does not decode
    BadSnapshot,
    /// keywords or context differ from a rebuild
    InconsistentIndex,
    /// annotation digest found in no metadata of the lineage
    DanglingAnnotation,
    UnknownClass,
    MissingAsset,
    CorruptAsset,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::MissingObject => "missing object",
            IssueKind::CorruptObject => "corrupt object",
            IssueKind::BadSnapshot => "bad snapshot",
            IssueKind::InconsistentIndex => "inconsistent index",
            IssueKind::DanglingAnnotation => "dangling annotation",
            IssueKind::UnknownClass => "unknown class",
            IssueKind::MissingAsset => "missing asset",
            IssueKind::CorruptAsset => "corrupt asset",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct FsckIssue {
    pub kind: IssueKind,
    /// commit the issue was found in
    pub commit: Option<Hash>,
    pub message: String,
}

impl fmt::Display for FsckIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.commit {
            Some(c) => write!(f, "{} in {}: {}", self.kind, c.short(), self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// fsck report
#[derive(Debug, Default)]
pub struct FsckReport {
    pub commits_checked: usize,
    pub assets_checked: usize,
    pub issues: Vec<FsckIssue>,
    /// commit and partition objects not reachable from any branch
    pub dangling_objects: Vec<Hash>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, kind: IssueKind, commit: Option<Hash>, message: impl Into<String>) {
        self.issues.push(FsckIssue {
            kind,
            commit,
            message: message.into(),
        });
    }
}

/// verify repository integrity; `verify_assets` re-hashes every asset
pub fn fsck(repo: &Repo, labels: &LabelRegistry, verify_assets: bool) -> Result<FsckReport> {
    let mut report = FsckReport::default();

    // commit -> (parents, metadata digests, unresolved annotation digests)
    let mut visited: HashMap<Hash, Visited> = HashMap::new();
    let mut reachable_partitions = HashSet::new();
    let mut assets = BTreeSet::new();

    for branch in list_branches(repo)? {
        let tip = read_branch(repo, &branch)?;
        let mut queue = VecDeque::from([(tip, format!("branch {}", branch))]);

        while let Some((hash, referenced_by)) = queue.pop_front() {
            if visited.contains_key(&hash) {
                continue;
            }

            let commit = match read_commit(repo, &hash) {
                Ok(c) => c,
                Err(Error::ObjectNotFound(_)) => {
                    report.push(
                        IssueKind::MissingObject,
                        None,
                        format!("commit {} referenced by {}", hash, referenced_by),
                    );
                    visited.insert(hash, Visited::default());
                    continue;
                }
                Err(Error::CorruptObject(_)) => {
                    report.push(IssueKind::CorruptObject, None, format!("commit {}", hash));
                    visited.insert(hash, Visited::default());
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.commits_checked += 1;
            reachable_partitions.extend(commit.partitions.values().copied());

            let mut v = Visited {
                parents: commit.parents.clone(),
                ..Default::default()
            };
            if let Some(snapshot) = load_checked(repo, &hash, &commit, &mut report)? {
                check_snapshot(&hash, &snapshot, labels, &mut report);
                v.metadatas = snapshot.metadatas.assets.keys().copied().collect();
                v.unresolved = snapshot
                    .unresolved_annotation_digests()
                    .into_iter()
                    .map(|(_, digest)| digest)
                    .collect();
                assets.extend(v.metadatas.iter().copied());
            }

            for parent in &commit.parents {
                queue.push_back((*parent, format!("commit {}", hash.short())));
            }
            visited.insert(hash, v);
        }
    }

    check_dangling_annotations(&visited, &mut report);

    for digest in &assets {
        report.assets_checked += 1;
        if !repo.store().contains(digest) {
            report.push(IssueKind::MissingAsset, None, digest.to_string());
        } else if verify_assets && !repo.store().verify(digest)? {
            report.push(IssueKind::CorruptAsset, None, digest.to_string());
        }
    }

    for hash in list_objects(&repo.commits_path())? {
        if !visited.contains_key(&hash) {
            report.dangling_objects.push(hash);
        }
    }
    for hash in list_objects(&repo.partitions_path())? {
        if !reachable_partitions.contains(&hash) {
            report.dangling_objects.push(hash);
        }
    }

    tracing::info!(
        commits = report.commits_checked,
        assets = report.assets_checked,
        issues = report.issues.len(),
        "fsck"
    );
    Ok(report)
}

#[derive(Default)]
struct Visited {
    parents: Vec<Hash>,
    metadatas: HashSet<Hash>,
    unresolved: BTreeSet<Hash>,
}

/// read and decode every partition of a commit, reporting instead of failing
fn load_checked(
    repo: &Repo,
    hash: &Hash,
    commit: &crate::types::Commit,
    report: &mut FsckReport,
) -> Result<Option<Snapshot>> {
    let mut payload = std::collections::BTreeMap::new();
    let mut complete = true;

    for kind in PartitionKind::ALL {
        let Some(partition) = commit.partition(kind) else {
            report.push(
                IssueKind::BadSnapshot,
                Some(*hash),
                format!("{} partition not recorded", kind),
            );
            complete = false;
            continue;
        };
        match read_partition(repo, partition) {
            Ok(Some(bytes)) => {
                payload.insert(kind, bytes);
            }
            Ok(None) => {
                report.push(
                    IssueKind::MissingObject,
                    Some(*hash),
                    format!("{} partition {}", kind, partition),
                );
                complete = false;
            }
            Err(Error::CorruptObject(_)) => {
                report.push(
                    IssueKind::CorruptObject,
                    Some(*hash),
                    format!("{} partition {}", kind, partition),
                );
                complete = false;
            }
            Err(e) => return Err(e),
        }
    }

    if !complete {
        return Ok(None);
    }
    match Snapshot::decode(payload) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            report.push(IssueKind::BadSnapshot, Some(*hash), e.to_string());
            Ok(None)
        }
    }
}

fn check_snapshot(hash: &Hash, snapshot: &Snapshot, labels: &LabelRegistry, report: &mut FsckReport) {
    if !snapshot.indices_consistent() {
        report.push(
            IssueKind::InconsistentIndex,
            Some(*hash),
            "keywords or context differ from head annotations",
        );
    }
    if snapshot.head_annotations().is_none() {
        report.push(
            IssueKind::BadSnapshot,
            Some(*hash),
            format!("head task {} has no annotation set", snapshot.head_task_id()),
        );
    }
    if snapshot.tasks.head().is_none() {
        report.push(
            IssueKind::BadSnapshot,
            Some(*hash),
            format!("head task {} not recorded", snapshot.head_task_id()),
        );
    }
    for class_id in snapshot.class_ids() {
        if !labels.contains_id(class_id) {
            report.push(IssueKind::UnknownClass, Some(*hash), format!("class id {}", class_id));
        }
    }
}

/// digests a commit cannot resolve itself must appear in some ancestor's metadata
fn check_dangling_annotations(visited: &HashMap<Hash, Visited>, report: &mut FsckReport) {
    let mut dangling: Vec<(Hash, Hash)> = Vec::new();

    for (hash, v) in visited {
        if v.unresolved.is_empty() {
            continue;
        }
        let mut unresolved = v.unresolved.clone();
        let mut queue: VecDeque<Hash> = v.parents.iter().copied().collect();
        let mut seen = HashSet::new();
        while let Some(ancestor) = queue.pop_front() {
            if unresolved.is_empty() || !seen.insert(ancestor) {
                continue;
            }
            if let Some(a) = visited.get(&ancestor) {
                unresolved.retain(|d| !a.metadatas.contains(d));
                queue.extend(a.parents.iter().copied());
            }
        }
        dangling.extend(unresolved.into_iter().map(|d| (*hash, d)));
    }

    dangling.sort();
    for (commit, digest) in dangling {
        report.push(IssueKind::DanglingAnnotation, Some(commit), digest.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::partition_path;
    use crate::ops::SnapshotDelta;
    use crate::revision::RevisionGraph;
    use crate::testutil::{self, Fixture};
    use std::fs;

    #[test]
    fn test_fsck_healthy_repo() {
        let fx = Fixture::new();
        testutil::commit_on(&fx, "a@b", SnapshotDelta::default()).unwrap();

        let report = fsck(&fx.repo, &fx.labels, true).unwrap();

        assert!(report.is_ok(), "{:?}", report.issues);
        assert_eq!(report.commits_checked, 2);
        assert_eq!(report.assets_checked, 2);
        assert!(report.dangling_objects.is_empty());
    }

    #[test]
    fn test_fsck_missing_asset() {
        let fx = Fixture::new();
        fs::remove_file(fx.repo.store().asset_path(&fx.d2)).unwrap();

        let report = fsck(&fx.repo, &fx.labels, false).unwrap();

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::MissingAsset);
    }

    #[test]
    fn test_fsck_corrupt_partition() {
        let fx = Fixture::new();
        let graph = RevisionGraph::new(&fx.repo);
        let tip = graph.resolve("a").unwrap();
        let commit = graph.read_commit(&tip).unwrap();
        let keywords = commit.partition(PartitionKind::Keywords).unwrap();
        fs::write(partition_path(&fx.repo, keywords), b"garbage").unwrap();

        let report = fsck(&fx.repo, &fx.labels, false).unwrap();

        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::CorruptObject && i.commit == Some(tip)));
    }

    #[test]
    fn test_fsck_reports_dangling_commits() {
        let fx = Fixture::new();
        testutil::commit_on(&fx, "b@b", SnapshotDelta::default()).unwrap();
        crate::refs::delete_branch(&fx.repo, "b").unwrap();

        let report = fsck(&fx.repo, &fx.labels, false).unwrap();

        assert!(report.is_ok());
        assert!(!report.dangling_objects.is_empty());
    }

    #[test]
    fn test_fsck_unknown_class() {
        let fx = Fixture::new();
        let other = fx.dir.path().join("other-labels.yaml");
        let labels = LabelRegistry::load_or_create(&other, true).unwrap();

        let report = fsck(&fx.repo, &labels, false).unwrap();

        let unknown: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::UnknownClass)
            .collect();
        assert_eq!(unknown.len(), 2);
    }
}
