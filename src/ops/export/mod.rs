//! materialize a revision as training data on disk
//!
//! assets go to the asset directory, either one `<digest>.<ext>` file each
//! (`raw`) or a single `assets.pack` container (`packed`). annotations go to
//! the annotation directory as one `<digest>.xml` per asset (`voc`) or one
//! `index.json` (`index`).
//!
//! every asset and every class name is resolved before the first write. a
//! failure after that point leaves a partial destination, which the caller
//! must discard.

pub mod index;
pub mod voc;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::Path;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::repo::Repo;
use crate::revision::RevisionGraph;
use crate::store::pack::{PackSummary, PackWriter};
use crate::types::{
    AnnoFormat, Annotation, AssetAttributes, AssetFormat, ContextRecord, ExportParams,
    TaskAnnotations,
};

use self::index::{IndexAnnotation, IndexAsset, IndexDocument, INDEX_FILE_NAME};
use self::voc::VocObject;

pub const PACK_FILE_NAME: &str = "assets.pack";

/// what an export produced
#[derive(Clone, Debug, Default)]
pub struct ExportStats {
    pub assets: usize,
    pub annotations: usize,
    /// assets left out because no annotation survived the class filter
    pub skipped: usize,
    pub pack: Option<PackSummary>,
}

struct Item<'a> {
    digest: Hash,
    attrs: &'a AssetAttributes,
    annotations: Vec<&'a Annotation>,
    context: Option<&'a ContextRecord>,
}

impl Item<'_> {
    fn file_name(&self) -> String {
        format!("{}.{}", self.digest, self.attrs.asset_type.extension())
    }
}

/// export the revision named by `params.source`
pub fn export(repo: &Repo, labels: &LabelRegistry, params: &ExportParams) -> Result<ExportStats> {
    let asset_dir = non_empty(params.asset_dir.as_deref());
    let anno_dir = non_empty(params.annotation_dir.as_deref());
    check_destinations(params, asset_dir, anno_dir)?;

    let (metadatas, head, task_id) = source_view(repo, &params.source)?;

    let filter = params
        .class_filter
        .iter()
        .map(|name| labels.resolve(name))
        .collect::<Result<BTreeSet<u32>>>()?;

    let mut stats = ExportStats::default();
    let mut items = Vec::new();
    for (digest, attrs) in &metadatas {
        let annotations: Vec<&Annotation> = head
            .assets
            .get(digest)
            .map(|annos| {
                annos
                    .iter()
                    .filter(|a| filter.is_empty() || filter.contains(&a.class_id))
                    .collect()
            })
            .unwrap_or_default();

        // voc needs annotation presence once a filter is active
        if params.anno_format == AnnoFormat::Voc && !filter.is_empty() && annotations.is_empty() {
            stats.skipped += 1;
            continue;
        }

        items.push(Item {
            digest: *digest,
            attrs,
            annotations,
            context: head.contexts.get(digest),
        });
    }

    for item in &items {
        if !repo.store().contains(&item.digest) {
            return Err(Error::AssetMissing(item.digest));
        }
    }
    let class_names = resolve_class_names(labels, &items)?;

    if let Some(dir) = asset_dir {
        fs::create_dir_all(dir).with_path(dir)?;
        match params.asset_format {
            AssetFormat::Raw => {
                for item in &items {
                    repo.store()
                        .copy_to(&item.digest, &dir.join(item.file_name()), false)?;
                }
            }
            AssetFormat::Packed => {
                let mut writer = PackWriter::create(&dir.join(PACK_FILE_NAME))?;
                for item in &items {
                    let path = repo.store().locate(&item.digest)?;
                    let mut file = File::open(&path).with_path(&path)?;
                    writer.add_reader(item.digest, &mut file)?;
                }
                stats.pack = Some(writer.finish()?);
            }
        }
    }

    if let Some(dir) = anno_dir {
        match params.anno_format {
            AnnoFormat::None => {}
            AnnoFormat::Voc => {
                fs::create_dir_all(dir).with_path(dir)?;
                for item in &items {
                    let objects: Vec<VocObject> = item
                        .annotations
                        .iter()
                        .map(|a| VocObject {
                            class_name: &class_names[&a.class_id],
                            annotation: a,
                        })
                        .collect();
                    let xml = voc::render(&item.file_name(), item.attrs, &objects, item.context);
                    let path = dir.join(format!("{}.xml", item.digest));
                    fs::write(&path, xml).with_path(&path)?;
                }
            }
            AnnoFormat::Index => {
                fs::create_dir_all(dir).with_path(dir)?;
                let doc = build_index(&task_id, &items, &class_names, params, asset_dir);
                doc.write(&dir.join(INDEX_FILE_NAME))?;
            }
        }
    }

    stats.assets = items.len();
    stats.annotations = items.iter().map(|i| i.annotations.len()).sum();

    tracing::info!(
        source = %params.source,
        assets = stats.assets,
        annotations = stats.annotations,
        skipped = stats.skipped,
        "exported"
    );
    Ok(stats)
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn check_destinations(
    params: &ExportParams,
    asset_dir: Option<&Path>,
    anno_dir: Option<&Path>,
) -> Result<()> {
    if asset_dir.is_none() && anno_dir.is_none() {
        return Err(Error::ConfigurationMissing(
            "export needs an asset directory or an annotation directory".to_string(),
        ));
    }
    if params.anno_format != AnnoFormat::None && anno_dir.is_none() {
        return Err(Error::ConfigurationMissing(format!(
            "{:?} export needs an annotation directory",
            params.anno_format
        )));
    }
    if params.asset_format == AssetFormat::Packed && asset_dir.is_none() {
        return Err(Error::ConfigurationMissing(
            "packed export needs an asset directory".to_string(),
        ));
    }
    if params.anno_format == AnnoFormat::None && asset_dir.is_none() {
        return Err(Error::ConfigurationMissing(
            "nothing to export: no asset directory and no annotation format".to_string(),
        ));
    }
    Ok(())
}

/// metadatas, head annotations and head task id of a revision expression;
/// extra branches are folded in with later-wins precedence
///
/// head digests missing from the metadatas take their attributes from the
/// lineage, or from the stored bytes when no ancestor recorded them
fn source_view(
    repo: &Repo,
    expr: &str,
) -> Result<(BTreeMap<Hash, AssetAttributes>, TaskAnnotations, String)> {
    let graph = RevisionGraph::new(repo);
    let resolved = graph.resolve_expr(expr)?;
    let primary = super::load_snapshot_at(repo, &resolved.commit)?;
    let task_id = primary.head_task_id().to_string();

    let (mut metadatas, head) = if resolved.extra.is_empty() {
        let head = primary.head_annotations().cloned().unwrap_or_default();
        (primary.metadatas.assets, head)
    } else {
        let mut snapshots = vec![primary];
        for (_, commit) in &resolved.extra {
            snapshots.push(super::load_snapshot_at(repo, commit)?);
        }
        let combined = super::combine_snapshots(&snapshots)?;
        (combined.metadatas.assets, combined.head)
    };

    let unrecorded: BTreeSet<Hash> = head
        .assets
        .keys()
        .chain(head.contexts.keys())
        .filter(|d| !metadatas.contains_key(*d))
        .copied()
        .collect();
    if !unrecorded.is_empty() {
        let found = super::storage::lineage_attributes(&graph, &resolved.commits(), &unrecorded)?;
        for digest in unrecorded {
            let attrs = match found.get(&digest) {
                Some(attrs) => attrs.clone(),
                None if repo.store().contains(&digest) => {
                    AssetAttributes::probe(&repo.store().get(&digest)?)
                }
                None => return Err(Error::AssetMissing(digest)),
            };
            metadatas.insert(digest, attrs);
        }
    }

    Ok((metadatas, head, task_id))
}

fn resolve_class_names(labels: &LabelRegistry, items: &[Item<'_>]) -> Result<BTreeMap<u32, String>> {
    let mut names = BTreeMap::new();
    for item in items {
        for a in &item.annotations {
            if !names.contains_key(&a.class_id) {
                names.insert(a.class_id, labels.main_name_for_id(a.class_id)?.to_string());
            }
        }
    }
    Ok(names)
}

fn build_index(
    task_id: &str,
    items: &[Item<'_>],
    class_names: &BTreeMap<u32, String>,
    params: &ExportParams,
    asset_dir: Option<&Path>,
) -> IndexDocument {
    let mut doc = IndexDocument::new(task_id);
    for item in items {
        let file_name = item.file_name();
        let location = match (params.media_location.as_deref(), params.asset_format, asset_dir) {
            (Some(prefix), _, _) if !prefix.is_empty() => {
                Some(format!("{}/{}", prefix.trim_end_matches('/'), file_name))
            }
            (_, AssetFormat::Raw, Some(dir)) => {
                Some(dir.join(&file_name).to_string_lossy().into_owned())
            }
            _ => None,
        };

        doc.assets.push(IndexAsset {
            digest: item.digest,
            location,
            asset_type: item.attrs.asset_type,
            width: item.attrs.width,
            height: item.attrs.height,
            channels: item.attrs.channels,
            annotations: item
                .annotations
                .iter()
                .map(|a| IndexAnnotation {
                    index: a.index,
                    rect: a.rect,
                    class_name: class_names[&a.class_id].clone(),
                    score: a.score,
                    anno_quality: a.anno_quality,
                    tags: a.tags.clone(),
                })
                .collect(),
            context: item.context.cloned(),
        });
    }
    doc
}
