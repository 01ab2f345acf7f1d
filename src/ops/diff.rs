use std::collections::BTreeSet;
use std::fmt;

use crate::error::Result;
use crate::hash::Hash;
use crate::repo::Repo;
use crate::snapshot::Snapshot;

use super::storage::load_snapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Added,
    Deleted,
    /// attributes differ for the same digest
    MetadataChanged,
    /// head annotations or context differ
    AnnotationsChanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Added => "A",
            ChangeKind::Deleted => "D",
            ChangeKind::MetadataChanged => "M",
            ChangeKind::AnnotationsChanged => "N",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub digest: Hash,
    pub kind: ChangeKind,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.kind, self.digest)
    }
}

/// per-asset changes going from revision `from` to revision `to`
pub fn diff(repo: &Repo, from: &str, to: &str) -> Result<Vec<DiffEntry>> {
    let (c1, s1) = load_snapshot(repo, from)?;
    let (c2, s2) = load_snapshot(repo, to)?;
    if c1 == c2 {
        return Ok(vec![]);
    }
    Ok(diff_snapshots(&s1, &s2))
}

/// compare two snapshots asset by asset, sorted by digest
pub fn diff_snapshots(a: &Snapshot, b: &Snapshot) -> Vec<DiffEntry> {
    let digests: BTreeSet<&Hash> = a
        .metadatas
        .assets
        .keys()
        .chain(b.metadatas.assets.keys())
        .collect();
    let head_a = a.head_annotations();
    let head_b = b.head_annotations();

    let mut changes = Vec::new();
    for digest in digests {
        let entry = |kind| DiffEntry {
            digest: *digest,
            kind,
        };
        match (a.metadatas.assets.get(digest), b.metadatas.assets.get(digest)) {
            (None, Some(_)) => changes.push(entry(ChangeKind::Added)),
            (Some(_), None) => changes.push(entry(ChangeKind::Deleted)),
            (Some(x), Some(y)) => {
                if x != y {
                    changes.push(entry(ChangeKind::MetadataChanged));
                }
                let annos_a = head_a.and_then(|h| h.assets.get(digest));
                let annos_b = head_b.and_then(|h| h.assets.get(digest));
                let ctx_a = head_a.and_then(|h| h.contexts.get(digest));
                let ctx_b = head_b.and_then(|h| h.contexts.get(digest));
                if !same_list(annos_a, annos_b) || ctx_a != ctx_b {
                    changes.push(entry(ChangeKind::AnnotationsChanged));
                }
            }
            (None, None) => {}
        }
    }
    changes
}

// an absent entry and an empty list both mean "no annotations"
fn same_list<T: PartialEq>(a: Option<&Vec<T>>, b: Option<&Vec<T>>) -> bool {
    let a = a.map(Vec::as_slice).unwrap_or_default();
    let b = b.map(Vec::as_slice).unwrap_or_default();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::SnapshotDelta;
    use crate::testutil::{self, Fixture};
    use crate::types::{Annotation, AssetAttributes, Rect, TaskAnnotations};
    use std::collections::BTreeMap;

    #[test]
    fn test_diff_identical() {
        let fx = Fixture::new();
        assert!(diff(&fx.repo, "a", "a@a").unwrap().is_empty());
    }

    #[test]
    fn test_diff_added_and_changed() {
        let fx = Fixture::new();
        let extra = fx.repo.store().put(&testutil::jpeg(8, 8, 42)).unwrap();

        let mut added = BTreeMap::new();
        added.insert(extra, AssetAttributes::probe(&testutil::jpeg(8, 8, 42)));

        let snap = crate::ops::load_snapshot_at(
            &fx.repo,
            &crate::refs::read_branch(&fx.repo, "a").unwrap(),
        )
        .unwrap();
        let mut head: TaskAnnotations = snap.head_annotations().cloned().unwrap();
        head.set(fx.d2, vec![Annotation::new(0, Rect::new(1, 1, 2, 2), 4)]);

        let delta = SnapshotDelta {
            added_assets: added,
            head_annotations: Some(head),
            ..Default::default()
        };
        testutil::commit_on(&fx, "a@b", delta).unwrap();

        let changes = diff(&fx.repo, "a@a", "a@b").unwrap();
        let mut expected = vec![
            DiffEntry {
                digest: extra,
                kind: ChangeKind::Added,
            },
            DiffEntry {
                digest: fx.d2,
                kind: ChangeKind::AnnotationsChanged,
            },
        ];
        expected.sort_by_key(|e| e.digest);
        assert_eq!(changes, expected);

        let back = diff(&fx.repo, "a@b", "a@a").unwrap();
        assert!(back
            .iter()
            .any(|e| e.digest == extra && e.kind == ChangeKind::Deleted));
    }

    #[test]
    fn test_diff_metadata_changed() {
        let fx = Fixture::new();
        let mut a = Snapshot::default();
        let mut b = Snapshot::default();
        a.metadatas.assets.insert(fx.d1, AssetAttributes::default());
        b.metadatas.assets.insert(
            fx.d1,
            AssetAttributes {
                width: 10,
                ..Default::default()
            },
        );

        assert_eq!(
            diff_snapshots(&a, &b),
            vec![DiffEntry {
                digest: fx.d1,
                kind: ChangeKind::MetadataChanged,
            }]
        );
    }
}
