use std::collections::BTreeSet;

use crate::error::Result;
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::repo::Repo;
use crate::revision::DstRev;
use crate::types::{FilterParams, Task, TaskParams};

use super::storage::{combine_snapshots, load_sources, save_and_commit};

/// keep the assets of `params.source` whose head annotations contain any
/// include class and none of the exclude classes
///
/// an empty include list admits every asset, negatives included.
pub fn filter(
    repo: &Repo,
    labels: &LabelRegistry,
    dst: &DstRev,
    params: &FilterParams,
    message: &str,
) -> Result<Hash> {
    TaskParams::Filter(params.clone()).validate()?;

    let include = resolve_all(labels, &params.include_classes)?;
    let exclude = resolve_all(labels, &params.exclude_classes)?;

    let sources = load_sources(repo, std::slice::from_ref(&params.source))?;
    let mut combined = combine_snapshots(sources.iter().map(|(_, snap)| snap))?;

    let keep: BTreeSet<Hash> = combined
        .metadatas
        .assets
        .keys()
        .filter(|digest| {
            let classes: BTreeSet<u32> = combined
                .head
                .assets
                .get(digest)
                .map(|annos| annos.iter().map(|a| a.class_id).collect())
                .unwrap_or_default();
            (include.is_empty() || !classes.is_disjoint(&include)) && classes.is_disjoint(&exclude)
        })
        .copied()
        .collect();
    let dropped = combined.metadatas.assets.len() - keep.len();
    combined.retain_assets(|digest| keep.contains(digest));

    let extra_parents: Vec<Hash> = sources.iter().skip(1).map(|(hash, _)| *hash).collect();
    let task = Task::new(
        dst.task_id.clone(),
        message,
        TaskParams::Filter(params.clone()),
    );
    let commit = save_and_commit(
        repo,
        labels,
        dst,
        Some(&params.source),
        combined.into_delta(extra_parents),
        task,
    )?;

    tracing::info!(dst = %dst, kept = keep.len(), dropped, "filtered");
    Ok(commit)
}

fn resolve_all(labels: &LabelRegistry, names: &[String]) -> Result<BTreeSet<u32>> {
    names.iter().map(|name| labels.resolve(name)).collect()
}
