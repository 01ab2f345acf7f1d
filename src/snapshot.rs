//! partitioned snapshot: the typed payload of one commit
//!
//! a snapshot is five partitions. `metadatas`, `annotations` and `tasks` are
//! primary data; `keywords` and `context` are indices derived from the head
//! task's annotations and rebuilt before every commit.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::types::{AssetAttributes, PartitionKind, Task, TaskAnnotations};

/// asset digest to attributes
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadatas {
    pub assets: BTreeMap<Hash, AssetAttributes>,
}

/// annotation sets keyed by the task that produced them
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    /// task whose set is the current view of the snapshot
    pub head_task_id: String,
    pub tasks: BTreeMap<String, TaskAnnotations>,
}

impl Annotations {
    pub fn head(&self) -> Option<&TaskAnnotations> {
        self.tasks.get(&self.head_task_id)
    }
}

/// every task in the lineage, plus the one that produced this snapshot
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tasks {
    pub head_task_id: String,
    pub tasks: BTreeMap<String, Task>,
}

impl Tasks {
    pub fn head(&self) -> Option<&Task> {
        self.tasks.get(&self.head_task_id)
    }
}

/// class membership index derived from head annotations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keywords {
    pub by_asset: BTreeMap<Hash, BTreeSet<u32>>,
    pub by_class: BTreeMap<u32, BTreeSet<Hash>>,
    /// assets without any head annotation
    pub negative: BTreeSet<Hash>,
}

/// context key index: key -> value -> assets
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextIndex {
    pub by_key: BTreeMap<String, BTreeMap<String, BTreeSet<Hash>>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub metadatas: Metadatas,
    pub annotations: Annotations,
    pub tasks: Tasks,
    pub keywords: Keywords,
    pub context: ContextIndex,
}

impl Snapshot {
    pub fn head_task_id(&self) -> &str {
        &self.tasks.head_task_id
    }

    /// annotations of the head task; empty when the head task annotated nothing
    pub fn head_annotations(&self) -> Option<&TaskAnnotations> {
        self.annotations.head()
    }

    pub fn asset_count(&self) -> usize {
        self.metadatas.assets.len()
    }

    /// recompute keywords and context from metadatas and head annotations
    pub fn rebuild_indices(&mut self) {
        self.keywords = build_keywords(&self.metadatas, self.annotations.head());
        self.context = build_context(self.annotations.head());
    }

    /// true if the stored derived partitions match a fresh rebuild
    pub fn indices_consistent(&self) -> bool {
        self.keywords == build_keywords(&self.metadatas, self.annotations.head())
            && self.context == build_context(self.annotations.head())
    }

    /// (task id, digest) pairs whose digest is absent from this snapshot's metadatas
    pub fn unresolved_annotation_digests(&self) -> Vec<(String, Hash)> {
        let mut missing = Vec::new();
        for (task_id, set) in &self.annotations.tasks {
            for digest in set.digests() {
                if !self.metadatas.assets.contains_key(digest) {
                    missing.push((task_id.clone(), *digest));
                }
            }
        }
        missing
    }

    /// every class id used by any annotation set
    pub fn class_ids(&self) -> BTreeSet<u32> {
        self.annotations
            .tasks
            .values()
            .flat_map(|set| set.assets.values())
            .flatten()
            .map(|a| a.class_id)
            .collect()
    }

    /// drop assets (and their annotations) for which `keep` is false
    pub fn retain_assets<F: Fn(&Hash) -> bool>(&mut self, keep: F) {
        self.metadatas.assets.retain(|d, _| keep(d));
        for set in self.annotations.tasks.values_mut() {
            set.assets.retain(|d, _| keep(d));
            set.contexts.retain(|d, _| keep(d));
        }
    }

    /// serialize one partition
    pub fn encode(&self, kind: PartitionKind) -> Result<Vec<u8>> {
        match kind {
            PartitionKind::Metadatas => to_cbor(&self.metadatas),
            PartitionKind::Annotations => to_cbor(&self.annotations),
            PartitionKind::Tasks => to_cbor(&self.tasks),
            PartitionKind::Keywords => to_cbor(&self.keywords),
            PartitionKind::Context => to_cbor(&self.context),
        }
    }

    /// serialize every partition
    pub fn encode_all(&self) -> Result<BTreeMap<PartitionKind, Vec<u8>>> {
        PartitionKind::ALL
            .into_iter()
            .map(|kind| Ok((kind, self.encode(kind)?)))
            .collect()
    }

    /// rebuild a snapshot from its partition payloads
    ///
    /// every partition must be present; a commit with a missing partition is
    /// not a valid snapshot.
    pub fn decode(mut payload: BTreeMap<PartitionKind, Vec<u8>>) -> Result<Self> {
        let mut take = |kind: PartitionKind| {
            payload.remove(&kind).ok_or_else(|| Error::InvariantViolation {
                partition: kind,
                message: "partition missing from commit".to_string(),
            })
        };

        Ok(Self {
            metadatas: from_cbor(&take(PartitionKind::Metadatas)?)?,
            annotations: from_cbor(&take(PartitionKind::Annotations)?)?,
            tasks: from_cbor(&take(PartitionKind::Tasks)?)?,
            keywords: from_cbor(&take(PartitionKind::Keywords)?)?,
            context: from_cbor(&take(PartitionKind::Context)?)?,
        })
    }
}

fn build_keywords(metadatas: &Metadatas, head: Option<&TaskAnnotations>) -> Keywords {
    let mut keywords = Keywords::default();

    for digest in metadatas.assets.keys() {
        let classes: BTreeSet<u32> = head
            .and_then(|h| h.assets.get(digest))
            .map(|annos| annos.iter().map(|a| a.class_id).collect())
            .unwrap_or_default();

        if classes.is_empty() {
            keywords.negative.insert(*digest);
            continue;
        }
        for class_id in &classes {
            keywords
                .by_class
                .entry(*class_id)
                .or_default()
                .insert(*digest);
        }
        keywords.by_asset.insert(*digest, classes);
    }

    keywords
}

fn build_context(head: Option<&TaskAnnotations>) -> ContextIndex {
    let mut index = ContextIndex::default();
    let Some(head) = head else {
        return index;
    };

    for (digest, record) in &head.contexts {
        for (key, value) in &record.cks {
            index
                .by_key
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(*digest);
        }
    }
    index
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation, ContextRecord, Rect, TaskParams};

    fn d(c: char) -> Hash {
        Hash::from_hex(&c.to_string().repeat(64)).unwrap()
    }

    fn sample() -> Snapshot {
        let mut snap = Snapshot::default();
        snap.metadatas.assets.insert(d('1'), AssetAttributes::default());
        snap.metadatas.assets.insert(d('2'), AssetAttributes::default());

        let mut set = TaskAnnotations::default();
        set.set(
            d('1'),
            vec![
                Annotation::new(0, Rect::new(0, 0, 5, 5), 3),
                Annotation::new(1, Rect::new(1, 1, 5, 5), 2),
            ],
        );
        let mut cks = BTreeMap::new();
        cks.insert("weather".to_string(), "sunny".to_string());
        set.contexts.insert(
            d('2'),
            ContextRecord {
                cks,
                image_quality: 0.5,
            },
        );

        snap.annotations.head_task_id = "a".into();
        snap.annotations.tasks.insert("a".into(), set);
        snap.tasks.head_task_id = "a".into();
        snap.tasks
            .tasks
            .insert("a".into(), Task::new("a", "init", TaskParams::Init));
        snap.rebuild_indices();
        snap
    }

    #[test]
    fn test_rebuild_indices() {
        let snap = sample();

        assert_eq!(
            snap.keywords.by_asset[&d('1')],
            [2, 3].into_iter().collect::<BTreeSet<u32>>()
        );
        assert!(snap.keywords.by_class[&3].contains(&d('1')));
        assert_eq!(
            snap.keywords.negative,
            [d('2')].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(snap.context.by_key["weather"]["sunny"].contains(&d('2')));
        assert!(snap.indices_consistent());
    }

    #[test]
    fn test_encode_decode() {
        let snap = sample();
        let decoded = Snapshot::decode(snap.encode_all().unwrap()).unwrap();
        assert_eq!(decoded, snap);
    }

    #[test]
    fn test_decode_requires_every_partition() {
        let mut payload = sample().encode_all().unwrap();
        payload.remove(&PartitionKind::Tasks);

        assert!(matches!(
            Snapshot::decode(payload),
            Err(Error::InvariantViolation {
                partition: PartitionKind::Tasks,
                ..
            })
        ));
    }

    #[test]
    fn test_unresolved_digests() {
        let mut snap = sample();
        assert!(snap.unresolved_annotation_digests().is_empty());

        snap.metadatas.assets.remove(&d('1'));
        assert_eq!(
            snap.unresolved_annotation_digests(),
            vec![("a".to_string(), d('1'))]
        );
        assert!(!snap.indices_consistent());
    }

    #[test]
    fn test_retain_assets() {
        let mut snap = sample();
        snap.retain_assets(|digest| *digest == d('2'));

        assert_eq!(snap.asset_count(), 1);
        assert!(snap.head_annotations().unwrap().assets.is_empty());
        assert!(snap.class_ids().is_empty());
    }
}
