use std::collections::BTreeSet;

use crate::error::Result;
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::refs;
use crate::repo::Repo;
use crate::revision::DstRev;
use crate::types::{MergeParams, Task, TaskParams};

use super::storage::{combine_snapshots, load_snapshot_at, load_sources, save_and_commit};

/// merge source revisions into `dst`
///
/// sources are combined in listed order, later sources winning per asset. an
/// existing `dst` branch takes part as the lowest-precedence source. assets of
/// every exclude revision are dropped from the result. the merge commit has
/// every source commit as a parent.
pub fn merge(
    repo: &Repo,
    labels: &LabelRegistry,
    dst: &DstRev,
    params: &MergeParams,
    message: &str,
) -> Result<Hash> {
    TaskParams::Merge(params.clone()).validate()?;

    let mut sources = Vec::new();
    if refs::branch_exists(repo, &dst.branch) {
        let tip = refs::read_branch(repo, &dst.branch)?;
        sources.push((tip, load_snapshot_at(repo, &tip)?));
    }
    let exprs: Vec<String> = params
        .sources
        .iter()
        .filter(|s| !s.trim().is_empty())
        .cloned()
        .collect();
    sources.extend(load_sources(repo, &exprs)?);

    let mut combined = combine_snapshots(sources.iter().map(|(_, snap)| snap))?;

    if !params.excludes.is_empty() {
        let excluded: BTreeSet<Hash> = load_sources(repo, &params.excludes)?
            .iter()
            .flat_map(|(_, snap)| snap.metadatas.assets.keys().copied())
            .collect();
        tracing::debug!(count = excluded.len(), "excluding assets");
        combined.retain_assets(|digest| !excluded.contains(digest));
    }

    let parents: Vec<Hash> = sources.iter().map(|(hash, _)| *hash).collect();
    let task = Task::new(
        dst.task_id.clone(),
        message,
        TaskParams::Merge(params.clone()),
    );
    let commit = save_and_commit(repo, labels, dst, None, combined.into_delta(parents), task)?;

    tracing::info!(dst = %dst, sources = sources.len(), commit = %commit.short(), "merged");
    Ok(commit)
}
