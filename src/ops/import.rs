use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::repo::Repo;
use crate::revision::DstRev;
use crate::store::PackReader;
use crate::types::{
    Annotation, AssetAttributes, ImportParams, Task, TaskAnnotations, TaskParams,
    UnknownLabelStrategy,
};

use super::export::index::IndexDocument;
use super::storage::{load_snapshot, save_and_commit, SnapshotDelta};

/// counts reported by an import
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub assets: usize,
    pub annotations: usize,
    /// annotations dropped because their class is unknown
    pub ignored_annotations: usize,
    /// classes registered during the import
    pub added_classes: Vec<String>,
}

/// import assets and annotations into `dst`
///
/// assets come from `asset_dir` (every regular file) and/or a pack file;
/// annotations and attributes come from an optional index document. each
/// indexed asset must be resolvable in the content store once the files are
/// ingested. the new head overlays imported annotations, per asset, onto the
/// base head.
pub fn import(
    repo: &Repo,
    labels: &mut LabelRegistry,
    dst: &DstRev,
    params: &ImportParams,
    message: &str,
) -> Result<(Hash, ImportStats)> {
    TaskParams::Import(params.clone()).validate()?;

    let mut stats = ImportStats::default();
    let mut added: BTreeMap<Hash, AssetAttributes> = BTreeMap::new();

    if let Some(dir) = &params.asset_dir {
        for (digest, attrs) in ingest_dir(repo, dir)? {
            added.insert(digest, attrs);
        }
    }
    if let Some(pack) = &params.pack {
        let reader = PackReader::open(pack)?;
        for digest in reader.digests() {
            let bytes = reader.get(digest)?;
            let stored = repo.store().put(&bytes)?;
            if stored != *digest {
                return Err(Error::CorruptPack {
                    path: pack.clone(),
                    message: format!("entry {} does not match its content", digest),
                });
            }
            added.insert(stored, AssetAttributes::probe(&bytes));
        }
    }

    let mut imported = TaskAnnotations::default();
    if let Some(index_file) = &params.index_file {
        let doc = IndexDocument::read(index_file)?;
        for entry in doc.assets {
            if !added.contains_key(&entry.digest) {
                let bytes = repo.store().get(&entry.digest)?;
                let attrs = entry
                    .attributes(bytes.len() as u64)
                    .unwrap_or_else(|| AssetAttributes::probe(&bytes));
                added.insert(entry.digest, attrs);
            }

            let mut annotations = Vec::with_capacity(entry.annotations.len());
            for a in entry.annotations {
                let class_id = match resolve_class(labels, &a.class_name, params.unknown_labels)? {
                    ClassLookup::Known(id) => id,
                    ClassLookup::Added(id) => {
                        stats.added_classes.push(a.class_name.clone());
                        id
                    }
                    ClassLookup::Ignored => {
                        stats.ignored_annotations += 1;
                        continue;
                    }
                };
                annotations.push(Annotation {
                    index: a.index,
                    rect: a.rect,
                    class_id,
                    score: a.score,
                    anno_quality: a.anno_quality,
                    tags: a.tags,
                });
            }
            imported.set(entry.digest, annotations);
            if let Some(context) = entry.context {
                imported.contexts.insert(entry.digest, context);
            }
        }
    }

    let base_rev = params.base.as_deref();
    let mut head = match base_rev {
        Some(expr) => load_snapshot(repo, expr)?
            .1
            .head_annotations()
            .cloned()
            .unwrap_or_default(),
        None => current_head(repo, dst)?,
    };
    for (digest, annotations) in imported.assets {
        head.assets.insert(digest, annotations);
    }
    head.contexts.extend(imported.contexts);

    stats.assets = added.len();
    stats.annotations = head.annotation_count();

    let delta = SnapshotDelta {
        added_assets: added,
        head_annotations: Some(head),
        ..Default::default()
    };
    let task = Task::new(
        dst.task_id.clone(),
        message,
        TaskParams::Import(params.clone()),
    );
    let commit = save_and_commit(repo, labels, dst, base_rev, delta, task)?;

    tracing::info!(
        dst = %dst,
        assets = stats.assets,
        ignored = stats.ignored_annotations,
        "imported"
    );
    Ok((commit, stats))
}

fn current_head(repo: &Repo, dst: &DstRev) -> Result<TaskAnnotations> {
    if !crate::refs::branch_exists(repo, &dst.branch) {
        return Ok(TaskAnnotations::default());
    }
    Ok(load_snapshot(repo, &dst.branch)?
        .1
        .head_annotations()
        .cloned()
        .unwrap_or_default())
}

fn ingest_dir(repo: &Repo, dir: &Path) -> Result<Vec<(Hash, AssetAttributes)>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            path: dir.to_path_buf(),
            source: e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")
            }),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = std::fs::read(entry.path()).with_path(entry.path())?;
        let digest = repo.store().put(&bytes)?;
        tracing::debug!(path = %entry.path().display(), digest = %digest.short(), "ingested");
        out.push((digest, AssetAttributes::probe(&bytes)));
    }
    Ok(out)
}

enum ClassLookup {
    Known(u32),
    Added(u32),
    Ignored,
}

fn resolve_class(
    labels: &mut LabelRegistry,
    name: &str,
    strategy: UnknownLabelStrategy,
) -> Result<ClassLookup> {
    match labels.resolve(name) {
        Ok(id) => Ok(ClassLookup::Known(id)),
        Err(Error::UnknownName(_)) => match strategy {
            UnknownLabelStrategy::Ignore => {
                tracing::warn!(class = name, "unknown class, annotation ignored");
                Ok(ClassLookup::Ignored)
            }
            UnknownLabelStrategy::Add => Ok(ClassLookup::Added(labels.add(name, &[])?)),
            UnknownLabelStrategy::Stop => Err(Error::UnknownName(name.to_string())),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::export::index::{IndexAnnotation, IndexAsset, INDEX_FILE_NAME};
    use crate::ops::export::export;
    use crate::testutil::{self, Fixture};
    use crate::types::{AnnoFormat, AssetFormat, ExportParams, Rect};
    use std::collections::BTreeSet;
    use std::fs;

    fn dst(s: &str) -> DstRev {
        DstRev::parse(s).unwrap()
    }

    fn index_with(digest: Hash, class_name: &str) -> IndexDocument {
        let mut doc = IndexDocument::new("src");
        doc.assets.push(IndexAsset {
            digest,
            location: None,
            asset_type: Default::default(),
            width: 0,
            height: 0,
            channels: 0,
            annotations: vec![IndexAnnotation {
                index: 0,
                rect: Rect::new(1, 2, 3, 4),
                class_name: class_name.to_string(),
                score: 0.5,
                anno_quality: -1.0,
                tags: BTreeMap::new(),
            }],
            context: None,
        });
        doc
    }

    #[test]
    fn test_import_directory() {
        let mut fx = Fixture::empty();
        let src = fx.dir.path().join("incoming");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("one.jpg"), testutil::jpeg(64, 48, 7)).unwrap();
        fs::write(src.join("nested/two.jpg"), testutil::jpeg(32, 16, 8)).unwrap();
        // duplicate bytes dedup to one asset
        fs::write(src.join("copy.jpg"), testutil::jpeg(64, 48, 7)).unwrap();

        let params = ImportParams {
            asset_dir: Some(src),
            ..Default::default()
        };
        let (commit, stats) =
            import(&fx.repo, &mut fx.labels, &dst("main@t1"), &params, "import").unwrap();
        assert_eq!(stats.assets, 2);

        let snap = crate::ops::load_snapshot_at(&fx.repo, &commit).unwrap();
        assert_eq!(snap.asset_count(), 2);
        assert_eq!(snap.keywords.negative.len(), 2);
        let dims: BTreeSet<(u32, u32)> = snap
            .metadatas
            .assets
            .values()
            .map(|a| (a.width, a.height))
            .collect();
        assert_eq!(dims, [(32, 16), (64, 48)].into_iter().collect());
    }

    #[test]
    fn test_unknown_label_strategies() {
        let mut fx = Fixture::empty();
        let index_path = fx.dir.path().join(INDEX_FILE_NAME);
        index_with(fx.d1, "unicorn").write(&index_path).unwrap();

        let mut params = ImportParams {
            index_file: Some(index_path),
            unknown_labels: UnknownLabelStrategy::Stop,
            ..Default::default()
        };
        assert!(matches!(
            import(&fx.repo, &mut fx.labels, &dst("s@t1"), &params, "stop"),
            Err(Error::UnknownName(_))
        ));

        params.unknown_labels = UnknownLabelStrategy::Ignore;
        let (_, stats) = import(&fx.repo, &mut fx.labels, &dst("i@t1"), &params, "ignore").unwrap();
        assert_eq!(stats.ignored_annotations, 1);
        assert_eq!(stats.annotations, 0);

        params.unknown_labels = UnknownLabelStrategy::Add;
        let (commit, stats) =
            import(&fx.repo, &mut fx.labels, &dst("a@t1"), &params, "add").unwrap();
        assert_eq!(stats.added_classes, vec!["unicorn".to_string()]);
        let id = fx.labels.resolve("unicorn").unwrap();
        let snap = crate::ops::load_snapshot_at(&fx.repo, &commit).unwrap();
        assert_eq!(snap.head_annotations().unwrap().assets[&fx.d1][0].class_id, id);
    }

    #[test]
    fn test_index_entry_must_resolve() {
        let mut fx = Fixture::empty();
        let index_path = fx.dir.path().join(INDEX_FILE_NAME);
        index_with(Hash::ZERO, "person").write(&index_path).unwrap();

        let params = ImportParams {
            index_file: Some(index_path),
            ..Default::default()
        };
        assert!(matches!(
            import(&fx.repo, &mut fx.labels, &dst("m@t1"), &params, "x"),
            Err(Error::AssetMissing(_))
        ));
    }

    #[test]
    fn test_export_import_roundtrip_into_new_registry() {
        let fx = Fixture::new();
        let out = fx.dir.path().join("out");
        export(
            &fx.repo,
            &fx.labels,
            &ExportParams {
                source: "a@a".into(),
                asset_dir: Some(out.join("assets")),
                annotation_dir: Some(out.join("annotations")),
                asset_format: AssetFormat::Packed,
                anno_format: AnnoFormat::Index,
                ..Default::default()
            },
        )
        .unwrap();

        // a fresh repository whose registry numbers classes differently
        let other_dir = tempfile::tempdir().unwrap();
        let other = Repo::init(&other_dir.path().join("repo")).unwrap();
        let mut labels = other.load_labels(false).unwrap();
        labels.add("airplane", &[]).unwrap();
        labels.add("person", &[]).unwrap();

        let params = ImportParams {
            pack: Some(out.join("assets").join(crate::ops::export::PACK_FILE_NAME)),
            index_file: Some(out.join("annotations").join(INDEX_FILE_NAME)),
            unknown_labels: UnknownLabelStrategy::Stop,
            ..Default::default()
        };
        let (commit, _) = import(&other, &mut labels, &dst("main@t1"), &params, "copy").unwrap();

        let tuples = |repo: &Repo, labels: &LabelRegistry, commit: &Hash| {
            let snap = crate::ops::load_snapshot_at(repo, commit).unwrap();
            let mut out = Vec::new();
            for (digest, annos) in &snap.head_annotations().unwrap().assets {
                for a in annos {
                    let name = labels.main_name_for_id(a.class_id).unwrap().to_string();
                    out.push((*digest, name, a.rect));
                }
            }
            out
        };

        let original_commit = crate::refs::read_branch(&fx.repo, "a").unwrap();
        assert_eq!(
            tuples(&other, &labels, &commit),
            tuples(&fx.repo, &fx.labels, &original_commit)
        );
        assert_ne!(
            labels.resolve("airplane").unwrap(),
            fx.labels.resolve("airplane").unwrap()
        );
    }

    #[test]
    fn test_import_extends_existing_branch() {
        let mut fx = Fixture::new();
        let src = fx.dir.path().join("more");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("three.jpg"), testutil::jpeg(10, 10, 9)).unwrap();

        let params = ImportParams {
            asset_dir: Some(src),
            ..Default::default()
        };
        let (commit, _) = import(&fx.repo, &mut fx.labels, &dst("a@t2"), &params, "more").unwrap();

        let snap = crate::ops::load_snapshot_at(&fx.repo, &commit).unwrap();
        assert_eq!(snap.asset_count(), 3);
        // annotations from task a carry over into the new head
        assert_eq!(snap.head_annotations().unwrap().assets[&fx.d1].len(), 4);
        assert!(snap.tasks.tasks.contains_key("a"));
    }
}
