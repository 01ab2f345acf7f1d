//! packed random-access asset container
//!
//! a single file holding many assets keyed by digest:
//!
//! ```text
//! "DVSP" | version: u32 BE
//! asset bytes, back to back
//! index: count x (digest: 32 bytes | offset: u64 BE | length: u64 BE), sorted by digest
//! trailer: index_offset: u64 BE | count: u32 BE | sha256 of everything above: 32 bytes
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;

const MAGIC: &[u8; 4] = b"DVSP";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;
const INDEX_ENTRY_LEN: u64 = 48;
const TRAILER_LEN: u64 = 44;

/// builds a pack file; nothing is visible at the final path until `finish`
pub struct PackWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    out: BufWriter<File>,
    hasher: Sha256,
    offset: u64,
    entries: BTreeMap<Hash, (u64, u64)>,
}

/// result of writing a pack file
#[derive(Clone, Debug)]
pub struct PackSummary {
    pub path: PathBuf,
    pub asset_count: usize,
    pub checksum: Hash,
}

impl PackWriter {
    /// start a pack that will be installed at `path`
    pub fn create(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_path(dir)?;

        let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let file = File::create(&tmp_path).with_path(&tmp_path)?;

        let mut writer = Self {
            path: path.to_path_buf(),
            tmp_path,
            out: BufWriter::new(file),
            hasher: Sha256::new(),
            offset: 0,
            entries: BTreeMap::new(),
        };
        writer.write(MAGIC)?;
        writer.write(&VERSION.to_be_bytes())?;
        Ok(writer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes).with_path(&self.tmp_path)?;
        self.hasher.update(bytes);
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// append an asset; returns false if the digest is already packed
    pub fn add(&mut self, hash: Hash, data: &[u8]) -> Result<bool> {
        if self.entries.contains_key(&hash) {
            return Ok(false);
        }
        let offset = self.offset;
        self.write(data)?;
        self.entries.insert(hash, (offset, data.len() as u64));
        Ok(true)
    }

    /// append an asset streamed from a reader
    pub fn add_reader<R: Read>(&mut self, hash: Hash, reader: &mut R) -> Result<bool> {
        if self.entries.contains_key(&hash) {
            return Ok(false);
        }
        let offset = self.offset;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).with_path(&self.tmp_path)?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n])?;
        }
        self.entries.insert(hash, (offset, self.offset - offset));
        Ok(true)
    }

    /// number of assets queued
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// write index and trailer, then move the pack into place
    pub fn finish(mut self) -> Result<PackSummary> {
        let index_offset = self.offset;
        let entries = std::mem::take(&mut self.entries);

        for (hash, (offset, length)) in &entries {
            self.write(hash.as_bytes())?;
            self.write(&offset.to_be_bytes())?;
            self.write(&length.to_be_bytes())?;
        }
        self.write(&index_offset.to_be_bytes())?;
        self.write(&(entries.len() as u32).to_be_bytes())?;

        let checksum = Hash::from_bytes(self.hasher.finalize_reset().into());
        self.out
            .write_all(checksum.as_bytes())
            .with_path(&self.tmp_path)?;
        self.out.flush().with_path(&self.tmp_path)?;
        self.out.get_ref().sync_all().with_path(&self.tmp_path)?;

        fs::rename(&self.tmp_path, &self.path).with_path(&self.path)?;

        tracing::debug!(pack = %self.path.display(), assets = entries.len(), "wrote pack");

        Ok(PackSummary {
            path: self.path.clone(),
            asset_count: entries.len(),
            checksum,
        })
    }
}

/// random-access reader over a pack file
pub struct PackReader {
    path: PathBuf,
    file: File,
    index: Vec<(Hash, u64, u64)>,
    data_end: u64,
    checksum: Hash,
}

impl PackReader {
    pub fn open(path: &Path) -> Result<Self> {
        let corrupt = |message: &str| Error::CorruptPack {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        let file = File::open(path).with_path(path)?;
        let len = file.metadata().with_path(path)?.len();
        if len < HEADER_LEN + TRAILER_LEN {
            return Err(corrupt("too short"));
        }

        let mut header = [0u8; 8];
        file.read_exact_at(&mut header, 0).with_path(path)?;
        if &header[..4] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }

        let mut trailer = [0u8; TRAILER_LEN as usize];
        file.read_exact_at(&mut trailer, len - TRAILER_LEN)
            .with_path(path)?;
        let index_offset = be_u64(&trailer[0..8]);
        let count = u32::from_be_bytes([trailer[8], trailer[9], trailer[10], trailer[11]]) as u64;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&trailer[12..44]);

        let index_end = len - TRAILER_LEN;
        if index_offset < HEADER_LEN
            || index_offset > index_end
            || index_end - index_offset != count * INDEX_ENTRY_LEN
        {
            return Err(corrupt("index bounds"));
        }

        let mut raw = vec![0u8; (count * INDEX_ENTRY_LEN) as usize];
        file.read_exact_at(&mut raw, index_offset).with_path(path)?;

        let mut index = Vec::with_capacity(count as usize);
        for chunk in raw.chunks_exact(INDEX_ENTRY_LEN as usize) {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&chunk[..32]);
            let offset = be_u64(&chunk[32..40]);
            let length = be_u64(&chunk[40..48]);
            let in_bounds = offset
                .checked_add(length)
                .is_some_and(|end| offset >= HEADER_LEN && end <= index_offset);
            if !in_bounds {
                return Err(corrupt("entry out of bounds"));
            }
            let hash = Hash::from_bytes(digest);
            if index.last().is_some_and(|(prev, _, _)| *prev >= hash) {
                return Err(corrupt("index not sorted"));
            }
            index.push((hash, offset, length));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
            data_end: len - 32,
            checksum: Hash::from_bytes(checksum),
        })
    }

    fn lookup(&self, hash: &Hash) -> Option<(u64, u64)> {
        self.index
            .binary_search_by(|(probe, _, _)| probe.cmp(hash))
            .ok()
            .map(|pos| (self.index[pos].1, self.index[pos].2))
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.lookup(hash).is_some()
    }

    /// read one asset's bytes
    pub fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        let (offset, length) = self.lookup(hash).ok_or(Error::AssetMissing(*hash))?;
        let mut buf = vec![0u8; length as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .with_path(&self.path)?;
        Ok(buf)
    }

    /// packed digests in index order
    pub fn digests(&self) -> impl Iterator<Item = &Hash> {
        self.index.iter().map(|(h, _, _)| h)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn checksum(&self) -> &Hash {
        &self.checksum
    }

    /// recompute the trailer checksum
    pub fn verify(&self) -> Result<bool> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut pos = 0u64;
        while pos < self.data_end {
            let n = ((self.data_end - pos) as usize).min(buf.len());
            self.file
                .read_exact_at(&mut buf[..n], pos)
                .with_path(&self.path)?;
            hasher.update(&buf[..n]);
            pos += n as u64;
        }
        Ok(Hash::from_bytes(hasher.finalize().into()) == self.checksum)
    }
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_asset_hash;
    use tempfile::tempdir;

    #[test]
    fn test_pack_random_access() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("assets.pack");

        let items: Vec<&[u8]> = vec![b"first asset", b"second", b""];
        let mut writer = PackWriter::create(&path).unwrap();
        for item in &items {
            assert!(writer.add(compute_asset_hash(item), item).unwrap());
        }
        let summary = writer.finish().unwrap();
        assert_eq!(summary.asset_count, 3);

        let reader = PackReader::open(&path).unwrap();
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.checksum(), &summary.checksum);
        for item in &items {
            assert_eq!(reader.get(&compute_asset_hash(item)).unwrap(), *item);
        }
        assert!(reader.verify().unwrap());
    }

    #[test]
    fn test_pack_dedups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.pack");

        let hash = compute_asset_hash(b"same");
        let mut writer = PackWriter::create(&path).unwrap();
        assert!(writer.add(hash, b"same").unwrap());
        assert!(!writer.add(hash, b"same").unwrap());
        assert_eq!(writer.len(), 1);
        writer.finish().unwrap();
    }

    #[test]
    fn test_pack_missing_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.pack");

        let mut writer = PackWriter::create(&path).unwrap();
        let mut cursor = std::io::Cursor::new(b"streamed".to_vec());
        writer
            .add_reader(compute_asset_hash(b"streamed"), &mut cursor)
            .unwrap();
        writer.finish().unwrap();

        let reader = PackReader::open(&path).unwrap();
        assert_eq!(reader.get(&compute_asset_hash(b"streamed")).unwrap(), b"streamed");
        assert!(matches!(
            reader.get(&Hash::ZERO),
            Err(Error::AssetMissing(_))
        ));
    }

    #[test]
    fn test_pack_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.pack");
        fs::write(&path, vec![7u8; 100]).unwrap();

        assert!(matches!(
            PackReader::open(&path),
            Err(Error::CorruptPack { .. })
        ));
    }

    fn two_entry_pack(path: &Path) -> (Vec<u8>, usize) {
        let mut writer = PackWriter::create(path).unwrap();
        writer.add(compute_asset_hash(b"abc"), b"abc").unwrap();
        writer.add(compute_asset_hash(b"defg"), b"defg").unwrap();
        writer.finish().unwrap();

        let bytes = fs::read(path).unwrap();
        let trailer = bytes.len() - TRAILER_LEN as usize;
        let index_offset = be_u64(&bytes[trailer..trailer + 8]) as usize;
        (bytes, index_offset)
    }

    #[test]
    fn test_pack_rejects_overflowing_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("o.pack");
        let (mut bytes, index_offset) = two_entry_pack(&path);

        let length = index_offset + 40;
        bytes[length..length + 8].copy_from_slice(&u64::MAX.to_be_bytes());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            PackReader::open(&path),
            Err(Error::CorruptPack { .. })
        ));
    }

    #[test]
    fn test_pack_rejects_unsorted_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("u.pack");
        let (mut bytes, index_offset) = two_entry_pack(&path);

        let entry = INDEX_ENTRY_LEN as usize;
        let (first, second) = bytes[index_offset..index_offset + 2 * entry].split_at_mut(entry);
        first.swap_with_slice(second);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            PackReader::open(&path),
            Err(Error::CorruptPack { .. })
        ));
    }

    #[test]
    fn test_pack_detects_tampering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.pack");

        let mut writer = PackWriter::create(&path).unwrap();
        writer.add(compute_asset_hash(b"abc"), b"abc").unwrap();
        writer.finish().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[8] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let reader = PackReader::open(&path).unwrap();
        assert!(!reader.verify().unwrap());
    }
}
