use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::repo::Repo;

/// point a branch at a commit (create or update)
///
/// the update is atomic: readers see either the old tip or the new one.
pub fn write_branch(repo: &Repo, branch: &str, hash: &Hash) -> Result<()> {
    validate_branch_name(branch)?;

    let path = branch_path(repo, branch);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    // atomic write: temp -> fsync -> rename
    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        writeln!(tmp_file, "{}", hash.to_hex()).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    fs::rename(&tmp_path, &path).with_path(&path)?;

    if let Some(parent) = path.parent() {
        let dir = File::open(parent).with_path(parent)?;
        dir.sync_all().with_path(parent)?;
    }

    Ok(())
}

/// read a branch tip
pub fn read_branch(repo: &Repo, branch: &str) -> Result<Hash> {
    validate_branch_name(branch)?;
    let path = branch_path(repo, branch);

    let content = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RevisionNotFound(branch.to_string())
        } else {
            Error::Io {
                path: path.clone(),
                source: e,
            }
        }
    })?;

    Hash::from_hex(content.trim())
}

/// delete a branch ref; commits stay until gc
pub fn delete_branch(repo: &Repo, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;
    let path = branch_path(repo, branch);

    fs::remove_file(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RevisionNotFound(branch.to_string())
        } else {
            Error::Io { path, source: e }
        }
    })
}

/// check if a branch exists
pub fn branch_exists(repo: &Repo, branch: &str) -> bool {
    validate_branch_name(branch).is_ok() && branch_path(repo, branch).is_file()
}

/// list all branches, sorted
pub fn list_branches(repo: &Repo) -> Result<Vec<String>> {
    let refs_dir = repo.refs_path();
    let mut branches = Vec::new();

    if refs_dir.exists() {
        collect_branches(&refs_dir, &refs_dir, &mut branches)?;
    }

    branches.sort();
    Ok(branches)
}

/// list branches matching a glob pattern
pub fn list_branches_matching(repo: &Repo, pattern: &str) -> Result<Vec<String>> {
    let glob = glob::Pattern::new(pattern).map_err(|e| Error::InvalidBranch(e.to_string()))?;
    Ok(list_branches(repo)?
        .into_iter()
        .filter(|b| glob.matches(b))
        .collect())
}

fn branch_path(repo: &Repo, branch: &str) -> PathBuf {
    repo.refs_path().join(branch)
}

fn collect_branches(base: &Path, dir: &Path, branches: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();

        if path.is_dir() {
            collect_branches(base, &path, branches)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                branches.push(rel.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

/// validate a branch name
///
/// names are ASCII, may be hierarchical (`user/exp1`), and never contain `@`
/// because `@` separates segments of a revision expression.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(Error::InvalidBranch(format!("{}: {}", why, name)));

    if name.is_empty() {
        return invalid("empty branch name");
    }
    if !name.is_ascii() {
        return invalid("branch name must be ASCII");
    }
    if name.contains('@') {
        return invalid("branch name cannot contain '@'");
    }
    if name.starts_with('/') || name.ends_with('/') {
        return invalid("branch name cannot start or end with '/'");
    }
    if name.contains("//") {
        return invalid("branch name cannot contain '//'");
    }
    if name.chars().any(|c| c.is_ascii_control() || c.is_ascii_whitespace()) {
        return invalid("branch name cannot contain whitespace or control characters");
    }
    if name.split('/').any(|c| c == "." || c == "..") {
        return invalid("branch name cannot contain '.' or '..'");
    }

    Ok(())
}
