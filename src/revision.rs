//! revision graph: commit DAG on the filesystem plus revision expressions
//!
//! a revision expression is `branch`, `branch@task_id` or
//! `branch1@branch2[@branch3...][@task_id]`. the first segment is the primary
//! branch. a trailing segment naming a task in the primary branch's lineage
//! selects the commit that introduced it; every other segment names an extra
//! source branch, which is resolved to its tip and left for the caller to
//! combine.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::{partition_exists, read_commit, read_partition, write_commit, write_partition};
use crate::refs;
use crate::repo::Repo;
use crate::types::{Commit, PartitionKind};

/// parsed `@`-delimited revision expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionExpr {
    segments: Vec<String>,
}

impl RevisionExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::InvalidRevision("empty revision".to_string()));
        }
        if !expr.is_ascii() {
            return Err(Error::InvalidRevision(format!("non-ascii revision: {}", expr)));
        }
        let segments: Vec<String> = expr.split('@').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidRevision(format!("empty segment in: {}", expr)));
        }
        refs::validate_branch_name(&segments[0])
            .map_err(|_| Error::InvalidRevision(format!("bad branch in: {}", expr)))?;
        Ok(Self { segments })
    }

    /// the primary branch
    pub fn branch(&self) -> &str {
        &self.segments[0]
    }

    /// segments after the primary branch
    pub fn rest(&self) -> &[String] {
        &self.segments[1..]
    }
}

impl fmt::Display for RevisionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("@"))
    }
}

/// destination of a mutating task: exactly `branch@task_id`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DstRev {
    pub branch: String,
    pub task_id: String,
}

impl DstRev {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = || Error::InvalidRevision(format!("expected branch@task_id: {}", expr));
        let (branch, task_id) = expr.trim().split_once('@').ok_or_else(invalid)?;
        if task_id.is_empty() || task_id.contains('@') {
            return Err(invalid());
        }
        refs::validate_branch_name(branch)?;
        Ok(Self {
            branch: branch.to_string(),
            task_id: task_id.to_string(),
        })
    }
}

impl fmt::Display for DstRev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.task_id)
    }
}

/// result of resolving a revision expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRevision {
    /// commit selected on the primary branch
    pub commit: Hash,
    pub branch: String,
    /// task selector, if the expression had one
    pub task_id: Option<String>,
    /// extra source branches and their tips, in expression order
    pub extra: Vec<(String, Hash)>,
}

impl ResolvedRevision {
    /// primary commit followed by the extra branch tips
    pub fn commits(&self) -> Vec<Hash> {
        std::iter::once(self.commit)
            .chain(self.extra.iter().map(|(_, h)| *h))
            .collect()
    }
}

/// versioned object store over a repository
pub struct RevisionGraph<'a> {
    repo: &'a Repo,
}

impl<'a> RevisionGraph<'a> {
    pub fn new(repo: &'a Repo) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Repo {
        self.repo
    }

    /// record payload partitions as a new commit and advance `branch`
    ///
    /// objects are written first and the branch ref last, so readers never
    /// see a partial commit. a parent that is missing, or whose payload is
    /// missing, fails with `CorruptHistory` before anything is written.
    pub fn commit(
        &self,
        branch: &str,
        parents: &[Hash],
        payload: &BTreeMap<PartitionKind, Vec<u8>>,
        task_id: &str,
        message: &str,
    ) -> Result<Hash> {
        refs::validate_branch_name(branch)?;
        for parent in parents {
            self.check_parent(parent)?;
        }

        let mut partitions = BTreeMap::new();
        for (kind, bytes) in payload {
            partitions.insert(*kind, write_partition(self.repo, bytes)?);
        }

        let commit = Commit::new(
            parents.to_vec(),
            partitions,
            task_id,
            self.repo.config().commit.author.clone(),
            message,
        );
        let hash = write_commit(self.repo, &commit)?;
        refs::write_branch(self.repo, branch, &hash)?;

        tracing::info!(branch, task_id, commit = %hash.short(), "committed");
        Ok(hash)
    }

    fn check_parent(&self, parent: &Hash) -> Result<()> {
        let commit = self.read_commit(parent)?;
        for (kind, hash) in &commit.partitions {
            if !partition_exists(self.repo, hash) {
                return Err(Error::CorruptHistory {
                    commit: *parent,
                    message: format!("{} payload {} missing", kind, hash.short()),
                });
            }
        }
        Ok(())
    }

    /// read a commit, reporting a missing object as history corruption
    pub fn read_commit(&self, hash: &Hash) -> Result<Commit> {
        read_commit(self.repo, hash).map_err(|e| match e {
            Error::ObjectNotFound(h) => Error::CorruptHistory {
                commit: h,
                message: "commit object missing".to_string(),
            },
            other => other,
        })
    }

    /// commit selected on the primary branch of `expr`
    pub fn resolve(&self, expr: &str) -> Result<Hash> {
        Ok(self.resolve_expr(expr)?.commit)
    }

    /// resolve every segment of a revision expression
    pub fn resolve_expr(&self, expr: &str) -> Result<ResolvedRevision> {
        let parsed = RevisionExpr::parse(expr)?;
        let branch = parsed.branch().to_string();
        let tip = refs::read_branch(self.repo, &branch)?;

        let rest = parsed.rest();
        let Some((last, middle)) = rest.split_last() else {
            return Ok(ResolvedRevision {
                commit: tip,
                branch,
                task_id: None,
                extra: Vec::new(),
            });
        };

        let (commit, task_id, extra_names) = match self.find_task_commit(&tip, last)? {
            Some(found) => (found, Some(last.clone()), middle),
            None => (tip, None, rest),
        };

        let mut extra = Vec::with_capacity(extra_names.len());
        for name in extra_names {
            if refs::validate_branch_name(name).is_err() || !refs::branch_exists(self.repo, name) {
                return Err(Error::RevisionNotFound(expr.to_string()));
            }
            extra.push((name.clone(), refs::read_branch(self.repo, name)?));
        }

        Ok(ResolvedRevision {
            commit,
            branch,
            task_id,
            extra,
        })
    }

    /// one partition payload of a commit; `None` if the commit has no such partition
    pub fn read_payload(&self, commit: &Hash, kind: PartitionKind) -> Result<Option<Vec<u8>>> {
        let c = self.read_commit(commit)?;
        let Some(hash) = c.partition(kind) else {
            return Ok(None);
        };
        match read_partition(self.repo, hash)? {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(Error::CorruptHistory {
                commit: *commit,
                message: format!("{} payload {} missing", kind, hash.short()),
            }),
        }
    }

    /// every partition payload of a commit
    pub fn read_all_payloads(&self, commit: &Hash) -> Result<BTreeMap<PartitionKind, Vec<u8>>> {
        let c = self.read_commit(commit)?;
        let mut payload = BTreeMap::new();
        for (kind, hash) in &c.partitions {
            let bytes = read_partition(self.repo, hash)?.ok_or_else(|| Error::CorruptHistory {
                commit: *commit,
                message: format!("{} payload {} missing", kind, hash.short()),
            })?;
            payload.insert(*kind, bytes);
        }
        Ok(payload)
    }

    /// all commits reachable from `start`, breadth first, each once
    pub fn lineage(&self, start: &Hash) -> Result<Vec<(Hash, Commit)>> {
        let mut out = Vec::new();
        self.walk(start, |hash, commit| {
            out.push((*hash, commit.clone()));
            Ok(true)
        })?;
        Ok(out)
    }

    /// commit in the lineage of `start` that introduced `task_id`
    pub fn find_task_commit(&self, start: &Hash, task_id: &str) -> Result<Option<Hash>> {
        let mut found = None;
        self.walk(start, |hash, commit| {
            if commit.task_id == task_id {
                found = Some(*hash);
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// visit the lineage of `start` with an explicit queue; the visitor
    /// returns false to stop the walk
    pub fn walk<F>(&self, start: &Hash, mut visit: F) -> Result<()>
    where
        F: FnMut(&Hash, &Commit) -> Result<bool>,
    {
        let mut queue = VecDeque::from([*start]);
        let mut seen = HashSet::new();

        while let Some(hash) = queue.pop_front() {
            if !seen.insert(hash) {
                continue;
            }
            let commit = self.read_commit(&hash)?;
            if !visit(&hash, &commit)? {
                break;
            }
            queue.extend(commit.parents.iter().copied());
        }
        Ok(())
    }
}
