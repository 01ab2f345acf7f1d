use std::path::PathBuf;

use crate::error::Result;
use crate::hash::Hash;
use crate::repo::Repo;

/// store one serialized partition payload
///
/// payloads are zstd compressed and addressed by the hash of the compressed
/// bytes, so unchanged partitions are shared between commits.
pub fn write_partition(repo: &Repo, payload: &[u8]) -> Result<Hash> {
    super::write_object(repo, &repo.partitions_path(), payload)
}

/// read a partition payload; `None` when the object is absent
pub fn read_partition(repo: &Repo, hash: &Hash) -> Result<Option<Vec<u8>>> {
    super::read_object(&repo.partitions_path(), hash)
}

pub fn partition_path(repo: &Repo, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    repo.partitions_path().join(dir).join(file)
}

pub fn partition_exists(repo: &Repo, hash: &Hash) -> bool {
    partition_path(repo, hash).exists()
}
