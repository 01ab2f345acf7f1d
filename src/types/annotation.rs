use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// axis-aligned bounding box in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> i64 {
        self.w.max(0) as i64 * self.h.max(0) as i64
    }
}

/// one labeled region of one asset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// stable ordering within the asset
    pub index: u32,
    #[serde(rename = "box")]
    pub rect: Rect,
    pub class_id: u32,
    #[serde(default)]
    pub score: f32,
    /// -1 when unknown
    #[serde(default = "unknown_quality")]
    pub anno_quality: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn unknown_quality() -> f32 {
    -1.0
}

impl Annotation {
    pub fn new(index: u32, rect: Rect, class_id: u32) -> Self {
        Self {
            index,
            rect,
            class_id,
            score: 0.0,
            anno_quality: -1.0,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// per-asset context keys plus image-level quality
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    #[serde(default)]
    pub cks: BTreeMap<String, String>,
    #[serde(default = "unknown_quality")]
    pub image_quality: f32,
}

/// annotations produced by one task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAnnotations {
    /// asset digest to its annotations, ordered by `index`
    #[serde(default)]
    pub assets: BTreeMap<Hash, Vec<Annotation>>,
    #[serde(default)]
    pub contexts: BTreeMap<Hash, ContextRecord>,
}

impl TaskAnnotations {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.contexts.is_empty()
    }

    pub fn annotation_count(&self) -> usize {
        self.assets.values().map(Vec::len).sum()
    }

    /// set annotations for an asset, re-sorted by index
    pub fn set(&mut self, digest: Hash, mut annotations: Vec<Annotation>) {
        annotations.sort_by_key(|a| a.index);
        self.assets.insert(digest, annotations);
    }

    /// every digest referenced by annotations or context records
    pub fn digests(&self) -> impl Iterator<Item = &Hash> {
        self.assets.keys().chain(
            self.contexts
                .keys()
                .filter(move |d| !self.assets.contains_key(*d)),
        )
    }

    /// keep only annotations whose class id passes `keep`; assets keep their
    /// (possibly empty) entry
    pub fn retain_classes<F: Fn(u32) -> bool>(&mut self, keep: F) {
        for annotations in self.assets.values_mut() {
            annotations.retain(|a| keep(a.class_id));
        }
    }
}
