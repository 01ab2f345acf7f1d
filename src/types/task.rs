use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// kind of operation that produced a commit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Init,
    Import,
    Merge,
    Filter,
    Export,
    Mining,
    Training,
    Label,
    Copy,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Init => "init",
            TaskType::Import => "import",
            TaskType::Merge => "merge",
            TaskType::Filter => "filter",
            TaskType::Export => "export",
            TaskType::Mining => "mining",
            TaskType::Training => "training",
            TaskType::Label => "label",
            TaskType::Copy => "copy",
        }
    }

    /// tasks that produce a commit
    pub fn is_mutating(&self) -> bool {
        !matches!(self, TaskType::Export)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// what to do with class names missing from the label registry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownLabelStrategy {
    /// drop annotations with unknown classes
    #[default]
    Ignore,
    /// register unknown classes
    Add,
    /// fail the import
    Stop,
}

impl std::str::FromStr for UnknownLabelStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ignore" => Ok(Self::Ignore),
            "add" => Ok(Self::Add),
            "stop" => Ok(Self::Stop),
            other => Err(Error::InvalidArgument(format!(
                "unknown label strategy: {}",
                other
            ))),
        }
    }
}

/// how exported asset bytes are laid out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetFormat {
    /// one file per digest
    #[default]
    Raw,
    /// a single digest-indexed container
    Packed,
}

impl std::str::FromStr for AssetFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Self::Raw),
            "packed" | "pack" => Ok(Self::Packed),
            other => Err(Error::InvalidArgument(format!("unknown asset format: {}", other))),
        }
    }
}

/// annotation output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnoFormat {
    /// assets only
    #[default]
    None,
    /// one box-list XML per asset
    Voc,
    /// one consolidated JSON index
    Index,
}

impl std::str::FromStr for AnnoFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "voc" => Ok(Self::Voc),
            "index" | "json" => Ok(Self::Index),
            other => Err(Error::InvalidArgument(format!(
                "unknown annotation format: {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportParams {
    /// directory of asset files
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
    /// packed container of assets
    #[serde(default)]
    pub pack: Option<PathBuf>,
    /// consolidated index with metadata and annotations
    #[serde(default)]
    pub index_file: Option<PathBuf>,
    /// revision to build on; the new commit starts from its snapshot
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub unknown_labels: UnknownLabelStrategy,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeParams {
    /// revision expressions, later entries win on conflicts
    pub sources: Vec<String>,
    /// revisions whose assets are dropped from the result
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub source: String,
    /// class names; empty keeps every asset
    #[serde(default)]
    pub include_classes: Vec<String>,
    #[serde(default)]
    pub exclude_classes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportParams {
    pub source: String,
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
    #[serde(default)]
    pub annotation_dir: Option<PathBuf>,
    /// path prefix recorded for assets in the index instead of the asset dir
    #[serde(default)]
    pub media_location: Option<String>,
    #[serde(default)]
    pub asset_format: AssetFormat,
    #[serde(default)]
    pub anno_format: AnnoFormat,
    /// class names to keep; empty disables filtering
    #[serde(default)]
    pub class_filter: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningParams {
    pub source: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub top_k: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub source: String,
    #[serde(default)]
    pub classes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelParams {
    pub source: String,
    #[serde(default)]
    pub classes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyParams {
    /// root of the repository to copy from
    pub src_repo: PathBuf,
    pub source: String,
    /// drop annotations whose class is unknown here instead of failing
    #[serde(default)]
    pub ignore_unknown_labels: bool,
}

/// type-specific task parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskParams {
    Init,
    Import(ImportParams),
    Merge(MergeParams),
    Filter(FilterParams),
    Export(ExportParams),
    Mining(MiningParams),
    Training(TrainingParams),
    Label(LabelParams),
    Copy(CopyParams),
}

impl TaskParams {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskParams::Init => TaskType::Init,
            TaskParams::Import(_) => TaskType::Import,
            TaskParams::Merge(_) => TaskType::Merge,
            TaskParams::Filter(_) => TaskType::Filter,
            TaskParams::Export(_) => TaskType::Export,
            TaskParams::Mining(_) => TaskType::Mining,
            TaskParams::Training(_) => TaskType::Training,
            TaskParams::Label(_) => TaskType::Label,
            TaskParams::Copy(_) => TaskType::Copy,
        }
    }

    /// reject parameter sets that cannot run
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| Err(Error::InvalidArgument(format!("missing {}", what)));
        match self {
            TaskParams::Init => Ok(()),
            TaskParams::Import(p) => {
                if p.asset_dir.is_none() && p.pack.is_none() && p.index_file.is_none() {
                    return missing("asset_dir, pack or index_file");
                }
                Ok(())
            }
            TaskParams::Merge(p) => {
                if p.sources.iter().all(|s| s.trim().is_empty()) {
                    return missing("merge sources");
                }
                Ok(())
            }
            TaskParams::Filter(p) if p.source.is_empty() => missing("filter source"),
            TaskParams::Export(p) if p.source.is_empty() => missing("export source"),
            TaskParams::Copy(p) if p.source.is_empty() => missing("copy source"),
            TaskParams::Mining(p) if p.source.is_empty() => missing("mining source"),
            TaskParams::Training(p) if p.source.is_empty() => missing("training source"),
            TaskParams::Label(p) if p.source.is_empty() => missing("label source"),
            _ => Ok(()),
        }
    }
}

/// immutable record of the operation that produced a commit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub message: String,
    pub timestamp: i64,
    pub params: TaskParams,
}

impl Task {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>, params: TaskParams) -> Self {
        Self {
            task_id: task_id.into(),
            message: message.into(),
            timestamp: super::commit::now_secs(),
            params,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.params.task_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_json_tagged() {
        let json = r#"{"type":"filter","source":"a@a","include_classes":["person"]}"#;
        let params: TaskParams = serde_json::from_str(json).unwrap();

        assert_eq!(params.task_type(), TaskType::Filter);
        match params {
            TaskParams::Filter(p) => {
                assert_eq!(p.source, "a@a");
                assert_eq!(p.include_classes, vec!["person".to_string()]);
                assert!(p.exclude_classes.is_empty());
            }
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn test_params_cbor() {
        let task = Task::new(
            "t1",
            "export it",
            TaskParams::Export(ExportParams {
                source: "a@a".into(),
                asset_dir: Some(PathBuf::from("/out/assets")),
                anno_format: AnnoFormat::Voc,
                ..Default::default()
            }),
        );

        let mut bytes = Vec::new();
        ciborium::into_writer(&task, &mut bytes).unwrap();
        let parsed: Task = ciborium::from_reader(&bytes[..]).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_validate() {
        assert!(TaskParams::Init.validate().is_ok());
        assert!(TaskParams::Import(ImportParams::default()).validate().is_err());
        assert!(TaskParams::Merge(MergeParams::default()).validate().is_err());
        assert!(TaskParams::Filter(FilterParams::default()).validate().is_err());
        assert!(TaskParams::Merge(MergeParams {
            sources: vec!["a".into()],
            excludes: vec![],
        })
        .validate()
        .is_ok());
    }

    #[test]
    fn test_formats_parse() {
        assert_eq!("packed".parse::<AssetFormat>().unwrap(), AssetFormat::Packed);
        assert_eq!("voc".parse::<AnnoFormat>().unwrap(), AnnoFormat::Voc);
        assert_eq!(
            "add".parse::<UnknownLabelStrategy>().unwrap(),
            UnknownLabelStrategy::Add
        );
        assert!("coco".parse::<AnnoFormat>().is_err());
    }
}
