mod annotation;
mod asset;
mod commit;
mod task;

pub use annotation::{Annotation, ContextRecord, Rect, TaskAnnotations};
pub use asset::{AssetAttributes, AssetType};
pub use commit::{Commit, PartitionKind};
pub use task::{
    AnnoFormat, AssetFormat, CopyParams, ExportParams, FilterParams, ImportParams, LabelParams,
    MergeParams, MiningParams, Task, TaskParams, TaskType, TrainingParams, UnknownLabelStrategy,
};
