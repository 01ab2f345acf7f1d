//! shared fixture: a repository with two jpeg assets and one annotating task

use std::collections::BTreeMap;

use tempfile::TempDir;

use crate::error::Result;
use crate::hash::Hash;
use crate::labels::LabelRegistry;
use crate::ops::{save_and_commit, SnapshotDelta};
use crate::repo::Repo;
use crate::revision::DstRev;
use crate::types::{
    Annotation, AssetAttributes, ContextRecord, ImportParams, Rect, Task, TaskAnnotations,
    TaskParams,
};

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub repo: Repo,
    pub labels: LabelRegistry,
    /// 500x281, four annotations: two person (2), two airplane (3)
    pub d1: Hash,
    /// 500x333, one person annotation
    pub d2: Hash,
}

/// minimal jpeg header carrying dimensions; `salt` makes the digest unique
pub(crate) fn jpeg(width: u16, height: u16, salt: u8) -> Vec<u8> {
    let mut b = vec![0xff, 0xd8];
    b.extend_from_slice(&[0xff, 0xc0, 0x00, 0x11, 0x08]);
    b.extend_from_slice(&height.to_be_bytes());
    b.extend_from_slice(&width.to_be_bytes());
    b.extend_from_slice(&[3, salt, 0xff, 0xd9]);
    b
}

impl Fixture {
    /// repository with labels and stored assets, but no commits
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();

        let mut labels = repo.load_labels(false).unwrap();
        for line in ["frisbee", "car", "person", "airplane,aeroplane", "dog"] {
            let (name, aliases) = crate::labels::parse_label_line(line).unwrap();
            let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
            labels.add(&name, &aliases).unwrap();
        }

        let d1 = repo.store().put(&jpeg(500, 281, 1)).unwrap();
        let d2 = repo.store().put(&jpeg(500, 333, 2)).unwrap();

        Self {
            dir,
            repo,
            labels,
            d1,
            d2,
        }
    }

    /// `empty()` plus task `a` committed on branch `a`
    pub fn new() -> Self {
        let fx = Self::empty();

        let mut head = TaskAnnotations::default();
        head.set(
            fx.d1,
            vec![
                Annotation::new(0, Rect::new(181, 127, 94, 67), 3).with_score(0.9),
                Annotation::new(1, Rect::new(10, 20, 30, 40), 2)
                    .with_score(0.8)
                    .with_tag("difficult", "0"),
                Annotation::new(2, Rect::new(50, 60, 70, 80), 3).with_score(0.7),
                Annotation::new(3, Rect::new(1, 2, 3, 4), 2).with_score(0.6),
            ],
        );
        head.set(
            fx.d2,
            vec![Annotation::new(0, Rect::new(0, 0, 100, 100), 2).with_score(0.5)],
        );
        head.contexts.insert(fx.d1, context("weather", "sunny", 0.8));
        head.contexts.insert(fx.d2, context("weather", "rainy", 0.3));

        let mut added = BTreeMap::new();
        for digest in [fx.d1, fx.d2] {
            let bytes = fx.repo.store().get(&digest).unwrap();
            added.insert(digest, AssetAttributes::probe(&bytes));
        }

        let delta = SnapshotDelta {
            added_assets: added,
            head_annotations: Some(head),
            ..Default::default()
        };
        commit_on(&fx, "a@a", delta).unwrap();
        fx
    }
}

fn context(key: &str, value: &str, quality: f32) -> ContextRecord {
    let mut cks = BTreeMap::new();
    cks.insert(key.to_string(), value.to_string());
    ContextRecord {
        cks,
        image_quality: quality,
    }
}

/// commit `delta` to `dst` (a `branch@task` expression) on top of the branch tip
pub(crate) fn commit_on(fx: &Fixture, dst: &str, delta: SnapshotDelta) -> Result<Hash> {
    let dst = DstRev::parse(dst)?;
    let task = Task::new(
        dst.task_id.clone(),
        format!("fixture {}", dst),
        TaskParams::Import(ImportParams::default()),
    );
    save_and_commit(&fx.repo, &fx.labels, &dst, None, delta, task)
}
