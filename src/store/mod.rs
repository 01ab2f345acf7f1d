//! content-addressed asset storage
//!
//! assets live at `<root>/<first 2 hex>/<remaining 62 hex>`, keyed by the
//! SHA-256 of their bytes. writes go through `<root>/tmp` and are renamed into
//! place, so a digest path either holds the full content or does not exist.

pub mod pack;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use nix::libc;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_asset_hash, AssetHasher, Hash};

pub use pack::{PackReader, PackWriter};

/// content-addressed blob storage for asset bytes
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// open a store, creating its directories if needed
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join("tmp")).with_path(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// open an existing store
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::ConfigurationMissing(format!(
                "content store not found at {}",
                root.display()
            )));
        }
        fs::create_dir_all(root.join("tmp")).with_path(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp").join(uuid::Uuid::new_v4().to_string())
    }

    /// filesystem path where a digest is (or would be) stored
    pub fn asset_path(&self, hash: &Hash) -> PathBuf {
        let (dir, file) = hash.to_path_components();
        self.root.join(dir).join(file)
    }

    /// check if an asset exists
    pub fn contains(&self, hash: &Hash) -> bool {
        self.asset_path(hash).is_file()
    }

    /// store bytes under their digest
    ///
    /// idempotent: storing identical bytes again returns the same digest and
    /// writes nothing.
    pub fn put(&self, content: &[u8]) -> Result<Hash> {
        let hash = compute_asset_hash(content);
        let path = self.asset_path(&hash);

        if path.exists() {
            tracing::debug!(digest = %hash.short(), "asset already stored");
            return Ok(hash);
        }

        let tmp_path = self.tmp_path();
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(content).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }

        self.install(&tmp_path, &hash)?;
        Ok(hash)
    }

    /// store content read from a stream (for large assets)
    pub fn put_reader<R: Read>(&self, reader: &mut R) -> Result<Hash> {
        let tmp_path = self.tmp_path();

        let mut hasher = AssetHasher::new();
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf).with_path(&tmp_path)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
            }
            tmp_file.sync_all().with_path(&tmp_path)?;
        }

        let hash = hasher.finalize();
        if self.contains(&hash) {
            fs::remove_file(&tmp_path).with_path(&tmp_path)?;
            return Ok(hash);
        }

        self.install(&tmp_path, &hash)?;
        Ok(hash)
    }

    /// store the content of a file
    pub fn put_file(&self, path: &Path) -> Result<Hash> {
        let mut file = File::open(path).with_path(path)?;
        self.put_reader(&mut file)
    }

    fn install(&self, tmp_path: &Path, hash: &Hash) -> Result<()> {
        let path = self.asset_path(hash);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).with_path(&dir)?;

        fs::rename(tmp_path, &path).with_path(&path)?;
        let dir_file = File::open(&dir).with_path(&dir)?;
        dir_file.sync_all().with_path(&dir)?;

        tracing::debug!(digest = %hash.short(), "stored asset");
        Ok(())
    }

    /// read asset bytes
    ///
    /// a missing digest is `AssetMissing` (incomplete repository), distinct
    /// from `Io` (transient failure).
    pub fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        let path = self.asset_path(hash);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AssetMissing(*hash)
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    /// stream asset bytes into a writer
    pub fn read_to<W: Write>(&self, hash: &Hash, writer: &mut W) -> Result<u64> {
        let path = self.locate(hash)?;
        let mut file = File::open(&path).with_path(&path)?;
        std::io::copy(&mut file, writer).with_path(&path)
    }

    /// path of the stored bytes, for copy-free export
    pub fn locate(&self, hash: &Hash) -> Result<PathBuf> {
        let path = self.asset_path(hash);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::AssetMissing(*hash))
        }
    }

    /// materialize an asset at `dest`, hardlinking when allowed and possible
    pub fn copy_to(&self, hash: &Hash, dest: &Path, hardlink: bool) -> Result<()> {
        let src = self.locate(hash)?;

        if dest.symlink_metadata().is_ok() {
            fs::remove_file(dest).with_path(dest)?;
        }

        if hardlink {
            match fs::hard_link(&src, dest) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // fall back to copy on cross-device links; otherwise bubble up
                    if e.raw_os_error() != Some(libc::EXDEV) {
                        return Err(Error::Io {
                            path: dest.to_path_buf(),
                            source: e,
                        });
                    }
                }
            }
        }

        fs::copy(&src, dest).with_path(dest)?;
        Ok(())
    }

    /// copy an asset from another store; no-op when already present
    pub fn import_from(&self, other: &ContentStore, hash: &Hash) -> Result<bool> {
        if self.contains(hash) {
            return Ok(false);
        }

        let src = other.locate(hash)?;
        let tmp_path = self.tmp_path();
        if fs::hard_link(&src, &tmp_path).is_err() {
            fs::copy(&src, &tmp_path).with_path(&tmp_path)?;
        }
        self.install(&tmp_path, hash)?;
        Ok(true)
    }

    /// re-hash stored bytes and compare with the digest
    pub fn verify(&self, hash: &Hash) -> Result<bool> {
        let path = self.locate(hash)?;
        let mut file = File::open(&path).with_path(&path)?;
        let mut hasher = AssetHasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).with_path(&path)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize() == *hash)
    }

    /// all stored digests, sorted
    pub fn list(&self) -> Result<Vec<Hash>> {
        let mut hashes = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| Error::Io {
                path: self.root.clone(),
                source: e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")
                }),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let parent_name = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("");
            if parent_name.len() != 2 {
                continue;
            }

            if let Ok(hash) = Hash::from_hex(&format!("{}{}", parent_name, file_name)) {
                hashes.push(hash);
            }
        }

        hashes.sort();
        Ok(hashes)
    }

    /// number of stored assets
    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempdir().unwrap();
        let store = ContentStore::create(&dir.path().join("assets")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_and_get() {
        let (_dir, store) = test_store();

        let hash = store.put(b"jpeg bytes").unwrap();
        assert!(store.contains(&hash));
        assert_eq!(store.get(&hash).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, store) = test_store();

        let h1 = store.put(b"duplicate content").unwrap();
        let h2 = store.put(b"duplicate content").unwrap();

        assert_eq!(h1, h2);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_path_structure() {
        let (_dir, store) = test_store();

        let hash = store.put(b"test").unwrap();
        let hex = hash.to_hex();
        assert!(store
            .asset_path(&hash)
            .ends_with(format!("{}/{}", &hex[..2], &hex[2..])));
    }

    #[test]
    fn test_missing_is_asset_missing() {
        let (_dir, store) = test_store();

        assert!(matches!(store.get(&Hash::ZERO), Err(Error::AssetMissing(_))));
        assert!(matches!(
            store.locate(&Hash::ZERO),
            Err(Error::AssetMissing(_))
        ));
    }

    #[test]
    fn test_streaming_put_matches() {
        let (_dir, store) = test_store();

        let content = b"streaming content test";
        let mut cursor = std::io::Cursor::new(content.as_slice());
        let streamed = store.put_reader(&mut cursor).unwrap();

        assert_eq!(streamed, store.put(content).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_read_to_writer() {
        let (_dir, store) = test_store();

        let hash = store.put(b"content to stream out").unwrap();
        let mut out = Vec::new();
        let n = store.read_to(&hash, &mut out).unwrap();

        assert_eq!(n, 21);
        assert_eq!(out, b"content to stream out");
    }

    #[test]
    fn test_copy_to() {
        let (dir, store) = test_store();

        let hash = store.put(b"pixels").unwrap();
        let dest = dir.path().join("out.jpg");

        store.copy_to(&hash, &dest, false).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");

        // overwrite in place
        store.copy_to(&hash, &dest, true).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");
    }

    #[test]
    fn test_import_from_other_store() {
        let (dir, src) = test_store();
        let dst = ContentStore::create(&dir.path().join("other")).unwrap();

        let hash = src.put(b"moved").unwrap();
        assert!(dst.import_from(&src, &hash).unwrap());
        assert!(!dst.import_from(&src, &hash).unwrap());
        assert_eq!(dst.get(&hash).unwrap(), b"moved");
    }

    #[test]
    fn test_verify_detects_corruption() {
        let (_dir, store) = test_store();

        let hash = store.put(b"original").unwrap();
        assert!(store.verify(&hash).unwrap());

        fs::write(store.asset_path(&hash), b"tampered").unwrap();
        assert!(!store.verify(&hash).unwrap());
    }

    #[test]
    fn test_list_ignores_tmp() {
        let (_dir, store) = test_store();

        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        fs::write(store.root().join("tmp").join("stray"), b"x").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list().unwrap(), expected);
    }

    #[test]
    fn test_open_missing_store() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ContentStore::open(&dir.path().join("absent")),
            Err(Error::ConfigurationMissing(_))
        ));
    }
}
