//! label registry: class names, aliases and stable integer ids
//!
//! persisted as one YAML file per repository. ids are append-only: an id is
//! never reassigned, and renames keep the previous name as an alias.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// one class: primary name, id and alias names
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LabelFile {
    #[serde(default)]
    labels: Vec<LabelEntry>,
}

/// in-memory view of the label file
///
/// the registry does not arbitrate between processes: concurrent writers must
/// hold the repository lock.
#[derive(Clone, Debug)]
pub struct LabelRegistry {
    path: PathBuf,
    entries: Vec<LabelEntry>,
    lookup: HashMap<String, u32>,
}

impl LabelRegistry {
    /// read the label file at `path`
    ///
    /// if absent, fails with `ConfigurationMissing` unless `create_if_missing`,
    /// in which case an empty registry is written there.
    pub fn load_or_create(path: &Path, create_if_missing: bool) -> Result<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(Error::ConfigurationMissing(format!(
                    "label file not found: {}",
                    path.display()
                )));
            }
            let registry = Self {
                path: path.to_path_buf(),
                entries: Vec::new(),
                lookup: HashMap::new(),
            };
            registry.save()?;
            return Ok(registry);
        }

        let content = fs::read_to_string(path).with_path(path)?;
        let file: LabelFile = if content.trim().is_empty() {
            LabelFile::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        let mut registry = Self {
            path: path.to_path_buf(),
            entries: Vec::with_capacity(file.labels.len()),
            lookup: HashMap::new(),
        };
        for entry in file.labels {
            registry.insert_entry(entry)?;
        }
        registry.entries.sort_by_key(|e| e.id);
        Ok(registry)
    }

    fn insert_entry(&mut self, mut entry: LabelEntry) -> Result<()> {
        entry.name = normalize_name(&entry.name)?;
        let mut aliases: Vec<String> = Vec::with_capacity(entry.aliases.len());
        for alias in &entry.aliases {
            let alias = normalize_name(alias)?;
            if alias != entry.name && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        entry.aliases = aliases;

        for key in std::iter::once(&entry.name).chain(entry.aliases.iter()) {
            match self.lookup.get(key) {
                Some(id) if *id != entry.id => return Err(Error::DuplicateName(key.clone())),
                _ => {
                    self.lookup.insert(key.clone(), entry.id);
                }
            }
        }
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(Error::DuplicateName(format!("id {}", entry.id)));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// all entries ordered by id
    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// id for a primary name or alias
    pub fn resolve(&self, name_or_alias: &str) -> Result<u32> {
        let key = normalize_name(name_or_alias)?;
        self.lookup
            .get(&key)
            .copied()
            .ok_or(Error::UnknownName(key))
    }

    /// ids for names plus the names that did not resolve
    pub fn id_for_names<S: AsRef<str>>(&self, names: &[S]) -> (Vec<u32>, Vec<String>) {
        let mut ids = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.resolve(name.as_ref()) {
                Ok(id) => ids.push(id),
                Err(_) => unknown.push(name.as_ref().to_string()),
            }
        }
        (ids, unknown)
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.entry(id).is_some()
    }

    fn entry(&self, id: u32) -> Option<&LabelEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// primary name for one id
    pub fn main_name_for_id(&self, id: u32) -> Result<&str> {
        self.entry(id)
            .map(|e| e.name.as_str())
            .ok_or(Error::UnknownId(id))
    }

    /// primary names in input order; unknown ids fail individually
    pub fn main_name_for_ids(&self, ids: &[u32]) -> Vec<Result<String>> {
        ids.iter()
            .map(|id| self.main_name_for_id(*id).map(str::to_string))
            .collect()
    }

    /// all primary names ordered by id
    pub fn all_main_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// register a class, or extend an existing one with new aliases
    ///
    /// fails with `DuplicateName` if the name or an alias already belongs to
    /// a different id. the file is flushed before returning; if the flush
    /// fails the registry is left unchanged.
    pub fn add(&mut self, name: &str, aliases: &[&str]) -> Result<u32> {
        let mut staged = self.clone();
        let (id, changed) = staged.stage_add(name, aliases)?;
        if changed {
            staged.save()?;
            *self = staged;
            tracing::info!(id, name = %name.trim(), "label registered");
        }
        Ok(id)
    }

    fn stage_add(&mut self, name: &str, aliases: &[&str]) -> Result<(u32, bool)> {
        let name = normalize_name(name)?;
        let aliases = aliases
            .iter()
            .map(|a| normalize_name(a))
            .collect::<Result<Vec<_>>>()?;

        let existing = self.lookup.get(&name).copied();
        if let Some(id) = existing {
            let is_primary = self.entry(id).map(|e| e.name == name).unwrap_or(false);
            if !is_primary {
                return Err(Error::DuplicateName(name));
            }
        }
        for alias in &aliases {
            if let Some(owner) = self.lookup.get(alias) {
                if Some(*owner) != existing {
                    return Err(Error::DuplicateName(alias.clone()));
                }
            }
        }

        let now = now_secs();
        let id = match existing {
            Some(id) => {
                let pos = self
                    .entries
                    .binary_search_by_key(&id, |e| e.id)
                    .map_err(|_| Error::UnknownId(id))?;
                let entry = &mut self.entries[pos];
                let mut changed = false;
                for alias in &aliases {
                    if *alias != entry.name && !entry.aliases.contains(alias) {
                        entry.aliases.push(alias.clone());
                        changed = true;
                    }
                }
                if !changed {
                    return Ok((id, false));
                }
                entry.update_time = now;
                id
            }
            None => {
                let id = self.next_id();
                let mut unique = Vec::new();
                for alias in aliases.iter().filter(|a| **a != name) {
                    if !unique.contains(alias) {
                        unique.push(alias.clone());
                    }
                }
                self.entries.push(LabelEntry {
                    id,
                    name: name.clone(),
                    aliases: unique,
                    create_time: now,
                    update_time: now,
                });
                self.lookup.insert(name.clone(), id);
                id
            }
        };
        for alias in aliases {
            self.lookup.insert(alias, id);
        }
        Ok((id, true))
    }

    /// change the primary name of an id; the old name stays as an alias
    pub fn rename(&mut self, id: u32, new_name: &str) -> Result<()> {
        let mut staged = self.clone();
        if staged.stage_rename(id, new_name)? {
            staged.save()?;
            *self = staged;
        }
        Ok(())
    }

    fn stage_rename(&mut self, id: u32, new_name: &str) -> Result<bool> {
        let new_name = normalize_name(new_name)?;
        if let Some(owner) = self.lookup.get(&new_name) {
            if *owner != id {
                return Err(Error::DuplicateName(new_name));
            }
        }

        let pos = self
            .entries
            .binary_search_by_key(&id, |e| e.id)
            .map_err(|_| Error::UnknownId(id))?;
        let entry = &mut self.entries[pos];
        if entry.name == new_name {
            return Ok(false);
        }

        let old = std::mem::replace(&mut entry.name, new_name.clone());
        entry.aliases.retain(|a| *a != new_name);
        entry.aliases.insert(0, old);
        entry.update_time = now_secs();
        self.lookup.insert(new_name, id);
        Ok(true)
    }

    /// next id: never reuses an id, since entries are never removed
    fn next_id(&self) -> u32 {
        self.entries.last().map(|e| e.id + 1).unwrap_or(0)
    }

    /// write the registry atomically
    pub fn save(&self) -> Result<()> {
        let file = LabelFile {
            labels: self.entries.clone(),
        };
        let content = serde_yaml::to_string(&file)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_path(dir)?;

        let tmp_path = dir.join(format!(".labels.{}.tmp", uuid::Uuid::new_v4()));
        {
            let mut tmp = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp.write_all(content.as_bytes()).with_path(&tmp_path)?;
            tmp.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &self.path).with_path(&self.path)?;
        Ok(())
    }
}

/// normalize a class name: trimmed, lower-case, no commas
pub fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::InvalidArgument("empty label name".to_string()));
    }
    if name.contains(',') {
        return Err(Error::InvalidArgument(format!(
            "label name cannot contain ',': {}",
            name
        )));
    }
    Ok(name)
}

/// split `"airplane,aeroplane"` into primary name and aliases
pub fn parse_label_line(line: &str) -> Result<(String, Vec<String>)> {
    let mut parts = line.split(',').map(str::trim).filter(|p| !p.is_empty());
    let name = parts
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("empty label line: {:?}", line)))?;
    let name = normalize_name(name)?;
    let aliases = parts.map(normalize_name).collect::<Result<Vec<_>>>()?;
    Ok((name, aliases))
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
