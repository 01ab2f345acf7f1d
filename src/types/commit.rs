use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// one typed slice of a commit's payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    Metadatas,
    Annotations,
    Tasks,
    Keywords,
    Context,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 5] = [
        PartitionKind::Metadatas,
        PartitionKind::Annotations,
        PartitionKind::Tasks,
        PartitionKind::Keywords,
        PartitionKind::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Metadatas => "metadatas",
            PartitionKind::Annotations => "annotations",
            PartitionKind::Tasks => "tasks",
            PartitionKind::Keywords => "keywords",
            PartitionKind::Context => "context",
        }
    }

    /// derived partitions are rebuilt from the others on every commit
    pub fn is_derived(&self) -> bool {
        matches!(self, PartitionKind::Keywords | PartitionKind::Context)
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PartitionKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        PartitionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("unknown partition: {}", s)))
    }
}

/// a commit object: partition payload hashes plus the task that produced it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// parent commit hashes (empty for initial, 1 for linear, 2+ for merge)
    pub parents: Vec<Hash>,
    /// payload object hash per partition
    pub partitions: BTreeMap<PartitionKind, Hash>,
    /// id of the task introduced by this commit
    pub task_id: String,
    pub author: String,
    /// unix timestamp (seconds since epoch)
    pub timestamp: i64,
    pub message: String,
    /// optional key-value metadata (uses BTreeMap for deterministic serialization)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Commit {
    pub fn new(
        parents: Vec<Hash>,
        partitions: BTreeMap<PartitionKind, Hash>,
        task_id: impl Into<String>,
        author: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(parents, partitions, task_id, author, now_secs(), message)
    }

    /// create a new commit with explicit timestamp
    pub fn with_timestamp(
        parents: Vec<Hash>,
        partitions: BTreeMap<PartitionKind, Hash>,
        task_id: impl Into<String>,
        author: impl Into<String>,
        timestamp: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parents,
            partitions,
            task_id: task_id.into(),
            author: author.into(),
            timestamp,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn partition(&self, kind: PartitionKind) -> Option<&Hash> {
        self.partitions.get(&kind)
    }

    /// is this an initial commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// is this a merge commit (multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
