//! revision statistics
//!
//! counts come from the head annotations of the resolved revision. histograms
//! use fixed, descending lower bounds: a value lands in the first bucket whose
//! bound it reaches.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::labels::LabelRegistry;
use crate::repo::Repo;
use crate::snapshot::Snapshot;

use super::storage::load_snapshot;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// 1.0, 0.9, ... 0.0
pub const QUALITY_BOUNDS: [f64; 11] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1, 0.0];
pub const ANNO_AREA_BOUNDS: [f64; 9] = [
    200_000.0, 100_000.0, 50_000.0, 10_000.0, 5_000.0, 2_500.0, 500.0, 50.0, 0.0,
];
pub const ASSET_AREA_BOUNDS: [f64; 8] = [
    8_000_000.0,
    6_000_000.0,
    4_000_000.0,
    2_000_000.0,
    1_000_000.0,
    500_000.0,
    100_000.0,
    0.0,
];

/// counts per descending lower bound
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram {
    pub bounds: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn new(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            counts: vec![0; bounds.len()],
        }
    }

    /// count `value`; values below the last bound are ignored
    pub fn add(&mut self, value: f64) {
        if let Some(i) = self.bounds.iter().position(|b| value >= *b) {
            self.counts[i] += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevisionStats {
    pub task_id: String,
    pub assets: usize,
    pub annotations: usize,
    pub negative_assets: usize,
    /// class name -> assets carrying it
    pub class_assets: BTreeMap<String, usize>,
    /// class name -> annotations
    pub class_annotations: BTreeMap<String, usize>,
    /// ck key -> value -> assets
    pub cks: BTreeMap<String, BTreeMap<String, usize>>,
    /// tag key -> value -> annotations
    pub tags: BTreeMap<String, BTreeMap<String, usize>>,
    pub image_quality: Histogram,
    pub anno_quality: Histogram,
    pub anno_area: Histogram,
    pub asset_area: Histogram,
    pub asset_bytes: Histogram,
    pub asset_hw_ratio: Histogram,
}

/// statistics of one revision
pub fn stats(repo: &Repo, labels: &LabelRegistry, expr: &str) -> Result<RevisionStats> {
    let (_, snapshot) = load_snapshot(repo, expr)?;
    snapshot_stats(&snapshot, labels)
}

/// statistics of a loaded snapshot; class names resolve through `labels`
pub fn snapshot_stats(snapshot: &Snapshot, labels: &LabelRegistry) -> Result<RevisionStats> {
    let bytes_bounds: Vec<f64> = (0..=10).rev().map(|x| x as f64 * BYTES_PER_MB / 2.0).collect();
    let hw_bounds: Vec<f64> = (0..=15).rev().map(|x| x as f64 / 10.0).collect();

    let mut s = RevisionStats {
        task_id: snapshot.head_task_id().to_string(),
        assets: snapshot.asset_count(),
        annotations: 0,
        negative_assets: snapshot.keywords.negative.len(),
        class_assets: BTreeMap::new(),
        class_annotations: BTreeMap::new(),
        cks: BTreeMap::new(),
        tags: BTreeMap::new(),
        image_quality: Histogram::new(&QUALITY_BOUNDS),
        anno_quality: Histogram::new(&QUALITY_BOUNDS),
        anno_area: Histogram::new(&ANNO_AREA_BOUNDS),
        asset_area: Histogram::new(&ASSET_AREA_BOUNDS),
        asset_bytes: Histogram::new(&bytes_bounds),
        asset_hw_ratio: Histogram::new(&hw_bounds),
    };

    for attrs in snapshot.metadatas.assets.values() {
        s.asset_area
            .add(f64::from(attrs.width) * f64::from(attrs.height));
        s.asset_bytes.add(attrs.byte_size as f64);
        if attrs.width > 0 {
            s.asset_hw_ratio
                .add(f64::from(attrs.height) / f64::from(attrs.width));
        }
    }

    for (class_id, digests) in &snapshot.keywords.by_class {
        let name = labels.main_name_for_id(*class_id)?;
        s.class_assets.insert(name.to_string(), digests.len());
    }

    for (key, values) in &snapshot.context.by_key {
        let counts = s.cks.entry(key.clone()).or_default();
        for (value, digests) in values {
            counts.insert(value.clone(), digests.len());
        }
    }

    let Some(head) = snapshot.head_annotations() else {
        return Ok(s);
    };

    for (digest, annotations) in &head.assets {
        if !snapshot.metadatas.assets.contains_key(digest) {
            continue;
        }
        for a in annotations {
            s.annotations += 1;
            let name = labels.main_name_for_id(a.class_id)?;
            *s.class_annotations.entry(name.to_string()).or_default() += 1;
            for (key, value) in &a.tags {
                *s.tags
                    .entry(key.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default() += 1;
            }
            // negative quality means "not assessed"
            if a.anno_quality >= 0.0 {
                s.anno_quality.add(f64::from(a.anno_quality));
            }
            s.anno_area.add(a.rect.area() as f64);
        }
    }

    for (digest, context) in &head.contexts {
        if snapshot.metadatas.assets.contains_key(digest) && context.image_quality >= 0.0 {
            s.image_quality.add(f64::from(context.image_quality));
        }
    }

    Ok(s)
}
