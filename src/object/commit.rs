use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::repo::Repo;
use crate::types::Commit;

/// write a commit to the object store
///
/// commits are serialized as CBOR, then zstd compressed.
/// the hash is computed over the compressed bytes.
pub fn write_commit(repo: &Repo, commit: &Commit) -> Result<Hash> {
    let mut cbor_bytes = Vec::new();
    ciborium::into_writer(commit, &mut cbor_bytes)?;
    super::write_object(repo, &repo.commits_path(), &cbor_bytes)
}

/// read a commit from the object store
pub fn read_commit(repo: &Repo, hash: &Hash) -> Result<Commit> {
    let cbor_bytes =
        super::read_object(&repo.commits_path(), hash)?.ok_or(Error::ObjectNotFound(*hash))?;
    let commit: Commit = ciborium::from_reader(&cbor_bytes[..])?;
    Ok(commit)
}

/// get the filesystem path to a commit object
pub fn commit_path(repo: &Repo, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    repo.commits_path().join(dir).join(file)
}

/// check if a commit exists in the object store
pub fn commit_exists(repo: &Repo, hash: &Hash) -> bool {
    commit_path(repo, hash).exists()
}
