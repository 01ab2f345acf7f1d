use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::repo::Repo;
use crate::revision::DstRev;
use crate::types::{CopyParams, Task, TaskAnnotations, TaskParams};

use super::storage::{combine_snapshots, load_sources, save_and_commit, Combined};

/// bring a revision of another repository into this one
///
/// assets move between content stores (hardlinked when both live on one
/// filesystem); class ids are translated by primary name through this
/// repository's label registry.
pub fn copy(
    repo: &Repo,
    labels: &LabelRegistry,
    dst: &DstRev,
    params: &CopyParams,
    message: &str,
) -> Result<Hash> {
    TaskParams::Copy(params.clone()).validate()?;

    let src_repo = Repo::open(&params.src_repo)?;
    let src_labels = src_repo.load_labels(false)?;

    let sources = load_sources(&src_repo, std::slice::from_ref(&params.source))?;
    let mut combined = combine_snapshots(sources.iter().map(|(_, snap)| snap))?;

    // older annotation sets may name assets the source lineage has since dropped
    let present: BTreeSet<Hash> = combined.metadatas.assets.keys().copied().collect();
    combined.retain_assets(|digest| present.contains(digest));

    let mapping = class_mapping(&combined, &src_labels, labels, params.ignore_unknown_labels)?;
    let mut dropped = 0;
    for set in combined
        .annotations
        .values_mut()
        .chain(std::iter::once(&mut combined.head))
    {
        dropped += remap(set, &mapping);
    }

    let mut copied = 0;
    for digest in combined.metadatas.assets.keys() {
        if repo.store().import_from(src_repo.store(), digest)? {
            copied += 1;
        }
    }

    let task = Task::new(
        dst.task_id.clone(),
        message,
        TaskParams::Copy(params.clone()),
    );
    let commit = save_and_commit(repo, labels, dst, None, combined.into_delta(Vec::new()), task)?;

    tracing::info!(
        dst = %dst,
        src = %params.src_repo.display(),
        copied,
        dropped,
        "copied revision"
    );
    Ok(commit)
}

/// source class id to destination class id; `None` drops the annotation
fn class_mapping(
    combined: &Combined,
    src: &LabelRegistry,
    dst: &LabelRegistry,
    ignore_unknown: bool,
) -> Result<BTreeMap<u32, Option<u32>>> {
    let ids: BTreeSet<u32> = combined
        .annotations
        .values()
        .chain(std::iter::once(&combined.head))
        .flat_map(|set| set.assets.values())
        .flatten()
        .map(|a| a.class_id)
        .collect();

    let mut mapping = BTreeMap::new();
    for id in ids {
        let name = src.main_name_for_id(id)?;
        let target = match dst.resolve(name) {
            Ok(target) => Some(target),
            Err(Error::UnknownName(_)) if ignore_unknown => {
                tracing::warn!(class = name, "class unknown here, annotations dropped");
                None
            }
            Err(e) => return Err(e),
        };
        mapping.insert(id, target);
    }
    Ok(mapping)
}

fn remap(set: &mut TaskAnnotations, mapping: &BTreeMap<u32, Option<u32>>) -> usize {
    let mut dropped = 0;
    for annotations in set.assets.values_mut() {
        let before = annotations.len();
        *annotations = annotations
            .drain(..)
            .filter_map(|mut a| {
                a.class_id = mapping.get(&a.class_id).copied().flatten()?;
                Some(a)
            })
            .collect();
        dropped += before - annotations.len();
    }
    dropped
}
