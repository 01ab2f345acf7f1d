//! high-level operations on dataset repositories

mod copy;
mod diff;
pub mod export;
mod filter;
mod fsck;
mod gc;
mod import;
mod log;
mod merge;
mod stats;
mod storage;

pub use copy::copy;
pub use diff::{diff, diff_snapshots, ChangeKind, DiffEntry};
pub use export::{export, ExportStats};
pub use filter::filter;
pub use fsck::{fsck, FsckIssue, FsckReport, IssueKind};
pub use gc::{gc, GcStats};
pub use import::{import, ImportStats};
pub use log::{log, LogEntry};
pub use merge::merge;
pub use stats::{snapshot_stats, stats, Histogram, RevisionStats};
pub use storage::{
    combine_snapshots, init_empty_revision, load_snapshot, load_snapshot_at, load_sources,
    save_and_commit, Combined, SnapshotDelta,
};
