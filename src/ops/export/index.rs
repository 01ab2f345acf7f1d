//! consolidated JSON index: one document describing every exported asset
//!
//! the same document is read back by import, so class ids never appear in it;
//! classes are carried by primary name.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::hash::Hash;
use crate::types::{AssetAttributes, AssetType, ContextRecord, Rect};

pub const INDEX_FILE_NAME: &str = "index.json";
pub const INDEX_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub version: u32,
    /// task whose annotations were exported
    #[serde(default)]
    pub task_id: String,
    pub assets: Vec<IndexAsset>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexAsset {
    pub digest: Hash,
    /// where the bytes can be found, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub asset_type: AssetType,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub channels: u32,
    #[serde(default)]
    pub annotations: Vec<IndexAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextRecord>,
}

impl IndexAsset {
    /// attributes recorded in the index; `None` when dimensions are absent
    pub fn attributes(&self, byte_size: u64) -> Option<AssetAttributes> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(AssetAttributes {
            asset_type: self.asset_type,
            width: self.width,
            height: self.height,
            channels: self.channels,
            byte_size,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexAnnotation {
    pub index: u32,
    #[serde(rename = "box")]
    pub rect: Rect,
    pub class_name: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default = "unknown_quality")]
    pub anno_quality: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn unknown_quality() -> f32 {
    -1.0
}

impl IndexDocument {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            version: INDEX_VERSION,
            task_id: task_id.into(),
            assets: Vec::new(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read(path).with_path(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// write pretty-printed JSON; identical documents produce identical bytes
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        let mut file = File::create(path).with_path(path)?;
        file.write_all(&bytes).with_path(path)?;
        file.sync_all().with_path(path)
    }
}
