pub mod commit;
pub mod partition;

pub use commit::{commit_exists, commit_path, read_commit, write_commit};
pub use partition::{partition_exists, partition_path, read_partition, write_partition};

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{IoResultExt, Result};
use crate::hash::{compute_object_hash, Hash};
use crate::repo::Repo;

/// compress `bytes` and store them under `root`, keyed by the compressed digest
///
/// existing objects are left alone.
pub(crate) fn write_object(repo: &Repo, root: &Path, bytes: &[u8]) -> Result<Hash> {
    let compressed = zstd::encode_all(bytes, 3).with_path("<zstd>")?;
    let hash = compute_object_hash(&compressed);

    let (dir, file) = hash.to_path_components();
    let object_dir = root.join(&dir);
    let object_path = object_dir.join(&file);

    if object_path.exists() {
        return Ok(hash);
    }

    fs::create_dir_all(&object_dir).with_path(&object_dir)?;

    // atomic write: temp -> fsync -> rename
    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(&compressed).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    fs::rename(&tmp_path, &object_path).with_path(&object_path)?;

    let dir_file = File::open(&object_dir).with_path(&object_dir)?;
    dir_file.sync_all().with_path(&object_dir)?;

    Ok(hash)
}

/// read, verify and decompress an object; `None` if it does not exist
pub(crate) fn read_object(root: &Path, hash: &Hash) -> Result<Option<Vec<u8>>> {
    let (dir, file) = hash.to_path_components();
    let path = root.join(dir).join(file);

    let compressed = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(crate::Error::Io { path, source: e }),
    };

    if compute_object_hash(&compressed) != *hash {
        return Err(crate::Error::CorruptObject(*hash));
    }

    let bytes = zstd::decode_all(&compressed[..]).with_path(&path)?;
    Ok(Some(bytes))
}

/// every object hash stored under `root`, sorted
pub(crate) fn list_objects(root: &Path) -> Result<Vec<Hash>> {
    let mut hashes = Vec::new();

    if !root.exists() {
        return Ok(hashes);
    }

    for entry in walkdir::WalkDir::new(root).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| crate::Error::Io {
            path: root.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        // objects/<kind>/XX/YYYYYY...
        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");

        if let Ok(hash) = Hash::from_hex(&format!("{}{}", parent_name, file_name)) {
            hashes.push(hash);
        }
    }

    hashes.sort();
    Ok(hashes)
}
