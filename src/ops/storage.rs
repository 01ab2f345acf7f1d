//! snapshot-level commits on top of the revision graph

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::refs;
use crate::repo::Repo;
use crate::revision::{DstRev, RevisionGraph};
use crate::snapshot::{Metadatas, Snapshot};
use crate::types::{AssetAttributes, PartitionKind, Task, TaskAnnotations, TaskParams};

/// partition replacements and additions applied on top of a base snapshot
#[derive(Clone, Debug, Default)]
pub struct SnapshotDelta {
    /// replaces the metadatas partition
    pub metadatas: Option<Metadatas>,
    /// assets added to the metadatas partition
    pub added_assets: BTreeMap<Hash, AssetAttributes>,
    /// replaces the annotation sets inherited from the base
    pub annotations: Option<BTreeMap<String, TaskAnnotations>>,
    /// annotation set of the new task; defaults to a copy of the base head
    pub head_annotations: Option<TaskAnnotations>,
    /// tasks carried over from other lineages
    pub inherited_tasks: BTreeMap<String, Task>,
    /// additional parents (merge sources)
    pub extra_parents: Vec<Hash>,
}

/// resolve `expr` and load the snapshot of its primary commit
pub fn load_snapshot(repo: &Repo, expr: &str) -> Result<(Hash, Snapshot)> {
    let graph = RevisionGraph::new(repo);
    let commit = graph.resolve(expr)?;
    Ok((commit, load_snapshot_at(repo, &commit)?))
}

/// load the snapshot stored in a commit
pub fn load_snapshot_at(repo: &Repo, commit: &Hash) -> Result<Snapshot> {
    let graph = RevisionGraph::new(repo);
    Snapshot::decode(graph.read_all_payloads(commit)?)
}

/// resolve a list of revision expressions, expanding multi-branch ones,
/// into commits and snapshots in listed order
pub fn load_sources(repo: &Repo, exprs: &[String]) -> Result<Vec<(Hash, Snapshot)>> {
    let graph = RevisionGraph::new(repo);
    let mut out = Vec::new();
    for expr in exprs {
        for commit in graph.resolve_expr(expr)?.commits() {
            out.push((commit, load_snapshot_at(repo, &commit)?));
        }
    }
    Ok(out)
}

/// apply `delta` to a base snapshot, validate, and commit it to `dst`
///
/// the base is `base_rev` if given, else the current tip of `dst.branch`, else
/// an empty snapshot. nothing is written when validation fails.
pub fn save_and_commit(
    repo: &Repo,
    labels: &LabelRegistry,
    dst: &DstRev,
    base_rev: Option<&str>,
    delta: SnapshotDelta,
    task: Task,
) -> Result<Hash> {
    if task.task_id != dst.task_id {
        return Err(Error::InvalidArgument(format!(
            "task id {} does not match destination {}",
            task.task_id, dst
        )));
    }

    let graph = RevisionGraph::new(repo);
    let dst_tip = if refs::branch_exists(repo, &dst.branch) {
        Some(refs::read_branch(repo, &dst.branch)?)
    } else {
        None
    };

    let base_commit = match base_rev {
        Some(expr) => Some(graph.resolve(expr)?),
        None => dst_tip,
    };

    let mut parents = Vec::new();
    for hash in base_commit.iter().chain(delta.extra_parents.iter()) {
        if !parents.contains(hash) {
            parents.push(*hash);
        }
    }
    if let Some(tip) = dst_tip {
        if !parents.contains(&tip) {
            return Err(Error::InvalidArgument(format!(
                "branch {} already exists and is not built on",
                dst.branch
            )));
        }
    }

    let base = match base_commit {
        Some(hash) => load_snapshot_at(repo, &hash)?,
        None => Snapshot::default(),
    };

    let snapshot = apply_delta(base, delta, task)?;
    validate(repo, &graph, labels, &snapshot, &parents)?;

    let message = snapshot
        .tasks
        .head()
        .map(|t| t.message.clone())
        .unwrap_or_default();
    let payload = snapshot.encode_all()?;
    graph.commit(&dst.branch, &parents, &payload, &dst.task_id, &message)
}

fn apply_delta(base: Snapshot, delta: SnapshotDelta, task: Task) -> Result<Snapshot> {
    let task_id = task.task_id.clone();
    if base.tasks.tasks.contains_key(&task_id) || delta.inherited_tasks.contains_key(&task_id) {
        return Err(Error::DuplicateTask(task_id));
    }

    let base_head = base.annotations.head().cloned().unwrap_or_default();
    let mut snapshot = Snapshot {
        metadatas: delta.metadatas.unwrap_or(base.metadatas),
        ..Default::default()
    };

    for (digest, attrs) in delta.added_assets {
        match snapshot.metadatas.assets.get(&digest) {
            Some(existing) if *existing != attrs => {
                return Err(Error::InvariantViolation {
                    partition: PartitionKind::Metadatas,
                    message: format!("conflicting attributes for asset {}", digest),
                });
            }
            Some(_) => {}
            None => {
                snapshot.metadatas.assets.insert(digest, attrs);
            }
        }
    }

    snapshot.annotations.tasks = delta.annotations.unwrap_or(base.annotations.tasks);
    snapshot
        .annotations
        .tasks
        .insert(task_id.clone(), delta.head_annotations.unwrap_or(base_head));
    snapshot.annotations.head_task_id = task_id.clone();

    snapshot.tasks.tasks = base.tasks.tasks;
    snapshot.tasks.tasks.extend(delta.inherited_tasks);
    snapshot.tasks.tasks.insert(task_id.clone(), task);
    snapshot.tasks.head_task_id = task_id;

    snapshot.rebuild_indices();
    Ok(snapshot)
}

/// cross-partition checks run before any object is written
fn validate(
    repo: &Repo,
    graph: &RevisionGraph,
    labels: &LabelRegistry,
    snapshot: &Snapshot,
    parents: &[Hash],
) -> Result<()> {
    for digest in snapshot.metadatas.assets.keys() {
        if !repo.store().contains(digest) {
            return Err(Error::InvariantViolation {
                partition: PartitionKind::Metadatas,
                message: format!("asset {} not in content store", digest),
            });
        }
    }

    let unresolved: BTreeSet<Hash> = snapshot
        .unresolved_annotation_digests()
        .into_iter()
        .map(|(_, digest)| digest)
        .collect();
    let found = lineage_attributes(graph, parents, &unresolved)?;
    if let Some(digest) = unresolved.iter().find(|d| !found.contains_key(*d)) {
        return Err(Error::InvariantViolation {
            partition: PartitionKind::Annotations,
            message: format!("annotations reference unknown asset {}", digest),
        });
    }

    for class_id in snapshot.class_ids() {
        if !labels.contains_id(class_id) {
            return Err(Error::InvariantViolation {
                partition: PartitionKind::Annotations,
                message: format!("class id {} not in label registry", class_id),
            });
        }
    }

    Ok(())
}

/// attributes of `wanted` assets as recorded by the metadata of `starts` or
/// their ancestors; the commit nearest to a start wins
pub(crate) fn lineage_attributes(
    graph: &RevisionGraph,
    starts: &[Hash],
    wanted: &BTreeSet<Hash>,
) -> Result<BTreeMap<Hash, AssetAttributes>> {
    let mut missing = wanted.clone();
    let mut found = BTreeMap::new();
    for start in starts {
        if missing.is_empty() {
            break;
        }
        graph.walk(start, |hash, _| {
            if let Some(bytes) = graph.read_payload(hash, PartitionKind::Metadatas)? {
                let metadatas: Metadatas = ciborium::from_reader(&bytes[..])?;
                missing.retain(|d| match metadatas.assets.get(d) {
                    Some(attrs) => {
                        found.insert(*d, attrs.clone());
                        false
                    }
                    None => true,
                });
            }
            Ok(!missing.is_empty())
        })?;
    }
    Ok(found)
}

/// sources folded in listed order
#[derive(Clone, Debug, Default)]
pub struct Combined {
    pub metadatas: Metadatas,
    pub annotations: BTreeMap<String, TaskAnnotations>,
    /// union of the sources' head sets
    pub head: TaskAnnotations,
    pub tasks: BTreeMap<String, Task>,
}

impl Combined {
    /// drop assets for which `keep` is false, from metadata and every set
    pub fn retain_assets<F: Fn(&Hash) -> bool>(&mut self, keep: F) {
        self.metadatas.assets.retain(|d, _| keep(d));
        for set in self.annotations.values_mut().chain(std::iter::once(&mut self.head)) {
            set.assets.retain(|d, _| keep(d));
            set.contexts.retain(|d, _| keep(d));
        }
    }

    pub fn into_delta(self, extra_parents: Vec<Hash>) -> SnapshotDelta {
        SnapshotDelta {
            metadatas: Some(self.metadatas),
            annotations: Some(self.annotations),
            head_annotations: Some(self.head),
            inherited_tasks: self.tasks,
            extra_parents,
            ..Default::default()
        }
    }
}

/// combine snapshots with order-stable precedence
///
/// later sources overwrite earlier ones per (task, asset) in the annotation
/// sets and per asset in the head view. metadata is union-merged, first
/// writer wins, and differing attributes for one digest are an
/// `InvariantViolation`.
pub fn combine_snapshots<'s, I>(sources: I) -> Result<Combined>
where
    I: IntoIterator<Item = &'s Snapshot>,
{
    let mut out = Combined::default();

    for snap in sources {
        for (digest, attrs) in &snap.metadatas.assets {
            match out.metadatas.assets.get(digest) {
                Some(existing) if existing != attrs => {
                    return Err(Error::InvariantViolation {
                        partition: PartitionKind::Metadatas,
                        message: format!("conflicting attributes for asset {}", digest),
                    });
                }
                Some(_) => {}
                None => {
                    out.metadatas.assets.insert(*digest, attrs.clone());
                }
            }
        }

        for (task_id, set) in &snap.annotations.tasks {
            let merged = out.annotations.entry(task_id.clone()).or_default();
            overlay(merged, set);
        }
        if let Some(head) = snap.head_annotations() {
            overlay(&mut out.head, head);
        }

        for (task_id, task) in &snap.tasks.tasks {
            out.tasks.entry(task_id.clone()).or_insert_with(|| task.clone());
        }
    }

    Ok(out)
}

fn overlay(into: &mut TaskAnnotations, from: &TaskAnnotations) {
    for (digest, annotations) in &from.assets {
        into.assets.insert(*digest, annotations.clone());
    }
    for (digest, context) in &from.contexts {
        into.contexts.insert(*digest, context.clone());
    }
}

/// commit an empty snapshot as the first revision of a branch
pub fn init_empty_revision(repo: &Repo, dst: &DstRev, message: &str) -> Result<Hash> {
    if refs::branch_exists(repo, &dst.branch) {
        return Err(Error::InvalidArgument(format!(
            "branch {} already exists",
            dst.branch
        )));
    }
    let labels = repo.load_labels(false)?;
    let task = Task::new(dst.task_id.clone(), message, TaskParams::Init);
    save_and_commit(repo, &labels, dst, None, SnapshotDelta::default(), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Fixture};
    use crate::types::{Annotation, Rect};

    fn dst(s: &str) -> DstRev {
        DstRev::parse(s).unwrap()
    }

    fn import_task(id: &str) -> Task {
        Task::new(id, "import", TaskParams::Import(Default::default()))
    }

    #[test]
    fn test_init_empty_revision() {
        let fx = Fixture::empty();

        let hash = init_empty_revision(&fx.repo, &dst("main@t0"), "init").unwrap();
        let snap = load_snapshot_at(&fx.repo, &hash).unwrap();

        assert_eq!(snap.asset_count(), 0);
        assert_eq!(snap.head_task_id(), "t0");
        assert!(snap.head_annotations().unwrap().is_empty());
        assert!(init_empty_revision(&fx.repo, &dst("main@t1"), "again").is_err());
    }

    #[test]
    fn test_fixture_snapshot() {
        let fx = Fixture::new();
        let (_, snap) = load_snapshot(&fx.repo, "a@a").unwrap();

        assert_eq!(snap.asset_count(), 2);
        let head = snap.head_annotations().unwrap();
        assert_eq!(head.assets[&fx.d1].len(), 4);
        assert_eq!(head.assets[&fx.d2].len(), 1);
        assert_eq!(
            snap.keywords.by_class[&3],
            [fx.d1].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let fx = Fixture::new();

        let result = save_and_commit(
            &fx.repo,
            &fx.labels,
            &dst("a@a"),
            None,
            SnapshotDelta::default(),
            import_task("a"),
        );
        assert!(matches!(result, Err(Error::DuplicateTask(_))));
    }

    #[test]
    fn test_task_id_must_match_destination() {
        let fx = Fixture::new();
        let result = save_and_commit(
            &fx.repo,
            &fx.labels,
            &dst("b@b"),
            Some("a"),
            SnapshotDelta::default(),
            import_task("c"),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_existing_branch_must_be_extended() {
        let fx = Fixture::new();
        testutil::commit_on(&fx, "b@b", SnapshotDelta::default()).unwrap();

        // b exists and is not among the parents when based on a
        let result = save_and_commit(
            &fx.repo,
            &fx.labels,
            &dst("b@c"),
            Some("a"),
            SnapshotDelta::default(),
            import_task("c"),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_asset_rejected() {
        let fx = Fixture::new();

        let mut delta = SnapshotDelta::default();
        delta
            .added_assets
            .insert(Hash::ZERO, AssetAttributes::default());

        let before = refs::read_branch(&fx.repo, "a").unwrap();
        let result = save_and_commit(&fx.repo, &fx.labels, &dst("a@t2"), None, delta, import_task("t2"));

        assert!(matches!(
            result,
            Err(Error::InvariantViolation {
                partition: PartitionKind::Metadatas,
                ..
            })
        ));
        assert_eq!(refs::read_branch(&fx.repo, "a").unwrap(), before);
    }

    #[test]
    fn test_dangling_annotation_rejected() {
        let fx = Fixture::new();

        let mut head = TaskAnnotations::default();
        head.set(Hash::ZERO, vec![Annotation::new(0, Rect::new(0, 0, 1, 1), 0)]);
        let delta = SnapshotDelta {
            head_annotations: Some(head),
            ..Default::default()
        };

        let result = save_and_commit(&fx.repo, &fx.labels, &dst("a@t2"), None, delta, import_task("t2"));
        assert!(matches!(
            result,
            Err(Error::InvariantViolation {
                partition: PartitionKind::Annotations,
                ..
            })
        ));
    }

    #[test]
    fn test_ancestor_metadata_satisfies_annotations() {
        let fx = Fixture::new();

        // drop d2 from metadata but keep annotating it: d2 is still known to
        // the parent commit
        let (_, snap) = load_snapshot(&fx.repo, "a").unwrap();
        let mut metadatas = snap.metadatas.clone();
        metadatas.assets.remove(&fx.d2);
        let delta = SnapshotDelta {
            metadatas: Some(metadatas),
            ..Default::default()
        };

        let hash =
            save_and_commit(&fx.repo, &fx.labels, &dst("a@t2"), None, delta, import_task("t2"))
                .unwrap();
        let snap = load_snapshot_at(&fx.repo, &hash).unwrap();
        assert_eq!(snap.asset_count(), 1);
        assert_eq!(snap.unresolved_annotation_digests().len(), 2);
    }

    #[test]
    fn test_unknown_class_rejected() {
        let fx = Fixture::new();

        let mut head = TaskAnnotations::default();
        head.set(fx.d1, vec![Annotation::new(0, Rect::new(0, 0, 1, 1), 999)]);
        let delta = SnapshotDelta {
            head_annotations: Some(head),
            ..Default::default()
        };

        let result = save_and_commit(&fx.repo, &fx.labels, &dst("a@t2"), None, delta, import_task("t2"));
        assert!(matches!(result, Err(Error::InvariantViolation { .. })));
    }

    #[test]
    fn test_combine_last_wins() {
        let fx = Fixture::new();
        let (_, first) = load_snapshot(&fx.repo, "a").unwrap();

        let mut second = first.clone();
        let replacement = vec![Annotation::new(0, Rect::new(9, 9, 9, 9), 1)];
        second
            .annotations
            .tasks
            .get_mut("a")
            .unwrap()
            .set(fx.d1, replacement.clone());

        let combined = combine_snapshots([&first, &second]).unwrap();
        assert_eq!(combined.annotations["a"].assets[&fx.d1], replacement);
        assert_eq!(combined.head.assets[&fx.d1], replacement);

        let combined = combine_snapshots([&second, &first]).unwrap();
        assert_eq!(combined.head.assets[&fx.d1].len(), 4);
    }

    #[test]
    fn test_combine_metadata_conflict() {
        let fx = Fixture::new();
        let (_, first) = load_snapshot(&fx.repo, "a").unwrap();

        let mut second = first.clone();
        second.metadatas.assets.get_mut(&fx.d1).unwrap().width += 1;

        assert!(matches!(
            combine_snapshots([&first, &second]),
            Err(Error::InvariantViolation {
                partition: PartitionKind::Metadatas,
                ..
            })
        ));
    }
}
