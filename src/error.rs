use std::path::PathBuf;

use crate::types::PartitionKind;
use crate::Hash;

/// error type for dvs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid branch name: {0}")]
    InvalidBranch(String),

    #[error("invalid revision expression: {0}")]
    InvalidRevision(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("corrupt history at commit {commit}: {message}")]
    CorruptHistory { commit: Hash, message: String },

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("corrupt object: hash mismatch for {0}")]
    CorruptObject(Hash),

    #[error("invariant violation in {partition} partition: {message}")]
    InvariantViolation {
        partition: PartitionKind,
        message: String,
    },

    #[error("asset missing from content store: {0}")]
    AssetMissing(Hash),

    #[error("label name already in use: {0}")]
    DuplicateName(String),

    #[error("unknown label name: {0}")]
    UnknownName(String),

    #[error("unknown class id: {0}")]
    UnknownId(u32),

    #[error("corrupt pack {path}: {message}")]
    CorruptPack { path: PathBuf, message: String },

    #[error("task id already present in lineage: {0}")]
    DuplicateTask(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("lock contention on repository")]
    LockContention,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("label file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// numeric status returned across the task-dispatch boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    InvalidArgs = 1,
    ConfigurationMissing = 2,
    RevisionNotFound = 3,
    CorruptHistory = 4,
    InvariantViolation = 5,
    AssetMissing = 6,
    LabelError = 7,
    IoFailure = 8,
    Locked = 9,
    Unsupported = 10,
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

impl Error {
    /// status code reported to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoRepo(_) | Error::ConfigurationMissing(_) => StatusCode::ConfigurationMissing,
            Error::RepoExists(_)
            | Error::InvalidBranch(_)
            | Error::InvalidRevision(_)
            | Error::DuplicateTask(_)
            | Error::InvalidArgument(_)
            | Error::InvalidHashHex(_) => StatusCode::InvalidArgs,
            Error::RevisionNotFound(_) => StatusCode::RevisionNotFound,
            Error::CorruptHistory { .. } | Error::ObjectNotFound(_) | Error::CorruptObject(_) => {
                StatusCode::CorruptHistory
            }
            Error::InvariantViolation { .. } => StatusCode::InvariantViolation,
            Error::AssetMissing(_) => StatusCode::AssetMissing,
            Error::DuplicateName(_) | Error::UnknownName(_) | Error::UnknownId(_) => {
                StatusCode::LabelError
            }
            Error::Unsupported(_) => StatusCode::Unsupported,
            Error::LockContention => StatusCode::Locked,
            Error::Io { .. }
            | Error::CorruptPack { .. }
            | Error::CborEncode(_)
            | Error::CborDecode(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_)
            | Error::Yaml(_)
            | Error::Json(_) => StatusCode::IoFailure,
        }
    }

    /// true for failures that leave the repository untouched and may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io { .. } | Error::LockContention)
    }
}

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
