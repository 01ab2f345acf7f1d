//! dvs - versioned storage for annotated datasets
//!
//! a repository keeps a commit DAG of dataset snapshots next to a
//! content-addressed asset store, in the spirit of git.
//!
//! # Core concepts
//!
//! - **Asset**: raw bytes (an image) addressed by the SHA-256 of its content,
//!   kept in a content store that several repositories may share
//! - **Snapshot**: five partitions (metadatas, annotations, tasks, keywords,
//!   context), each stored as a CBOR + zstd object
//! - **Commit**: parents, the partition object hashes and the id of the task
//!   that produced it
//! - **Branch**: a named pointer to a commit under `refs/heads`
//! - **Label registry**: class id <-> name mapping with aliases (`labels.yaml`)
//!
//! # Revision expressions
//!
//! `branch`, `branch@task_id`, or `branch@other[@...][@task_id]` to combine
//! several branches. commits are always made to `branch@task_id`.
//!
//! # Example usage
//!
//! ```no_run
//! use dvs::{ops, DstRev, Repo};
//! use dvs::types::{AnnoFormat, ExportParams, ImportParams};
//! use std::path::{Path, PathBuf};
//!
//! let repo = Repo::init(Path::new("/path/to/repo")).unwrap();
//! let mut labels = repo.load_labels(false).unwrap();
//! labels.add("person", &[]).unwrap();
//!
//! let params = ImportParams {
//!     asset_dir: Some(PathBuf::from("/incoming/images")),
//!     ..Default::default()
//! };
//! let dst = DstRev::parse("main@t1").unwrap();
//! ops::import(&repo, &mut labels, &dst, &params, "first import").unwrap();
//!
//! let export = ExportParams {
//!     source: "main".into(),
//!     asset_dir: Some(PathBuf::from("/out/assets")),
//!     annotation_dir: Some(PathBuf::from("/out/annotations")),
//!     anno_format: AnnoFormat::Voc,
//!     ..Default::default()
//! };
//! ops::export(&repo, &labels, &export).unwrap();
//! ```

mod config;
mod error;
mod hash;
mod object;
mod refs;
mod repo;

pub mod dispatch;
pub mod labels;
pub mod ops;
pub mod revision;
pub mod snapshot;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use dispatch::{run, TaskRequest, TaskResult};
pub use error::{Error, Result, StatusCode};
pub use hash::{compute_asset_hash, Hash};
pub use labels::LabelRegistry;
pub use object::{read_commit, read_partition};
pub use refs::{
    branch_exists, delete_branch, list_branches, list_branches_matching, read_branch,
    validate_branch_name, write_branch,
};
pub use repo::Repo;
pub use revision::{DstRev, RevisionExpr, RevisionGraph};
pub use snapshot::Snapshot;
pub use store::ContentStore;
