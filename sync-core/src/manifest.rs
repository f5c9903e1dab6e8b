//! The durable cross-device sync checkpoint
//!
//! The manifest is the only shared record of "what was true as of the last
//! successful sync". It is read once at the start of a run and replaced
//! wholesale at the end; there are no partial or merge writes at this layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Bumped when the manifest layout changes incompatibly.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Per-entity sync state: enough to detect change since the last sync
/// without fetching content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemSyncMeta {
    pub id: String,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
    /// Monotonically increasing per item; bumped on every upload.
    pub version: u64,
}

/// A propagated deletion. Created the instant a local delete is observed,
/// consumed by every other device on its next sync, retained indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionTombstone {
    pub id: String,
    pub kind: EntityKind,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by_device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncManifest {
    pub schema_version: u32,
    /// Overall counter, bumped on every successful write.
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub last_modified_device_id: String,
    pub last_modified_device_name: String,
    /// Per-kind map from entity id to its last-synced metadata.
    #[serde(default)]
    pub items: BTreeMap<EntityKind, BTreeMap<String, ItemSyncMeta>>,
    #[serde(default)]
    pub tombstones: Vec<DeletionTombstone>,
}

impl SyncManifest {
    /// The empty baseline assumed before the first sync ever.
    pub fn empty() -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            version: 0,
            last_modified: DateTime::<Utc>::UNIX_EPOCH,
            last_modified_device_id: String::new(),
            last_modified_device_name: String::new(),
            items: BTreeMap::new(),
            tombstones: Vec::new(),
        }
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<&ItemSyncMeta> {
        self.items.get(&kind).and_then(|map| map.get(id))
    }

    pub fn upsert(&mut self, kind: EntityKind, meta: ItemSyncMeta) {
        self.items.entry(kind).or_default().insert(meta.id.clone(), meta);
    }

    pub fn remove(&mut self, kind: EntityKind, id: &str) -> Option<ItemSyncMeta> {
        self.items.get_mut(&kind).and_then(|map| map.remove(id))
    }

    /// Ids known for a kind, in stable order.
    pub fn ids_of(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.items
            .get(&kind)
            .into_iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }

    pub fn item_count(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }

    pub fn has_tombstone(&self, kind: EntityKind, id: &str) -> bool {
        self.tombstones
            .iter()
            .any(|tombstone| tombstone.kind == kind && tombstone.id == id)
    }

    /// Append a tombstone unless the same deletion is already recorded.
    pub fn push_tombstone(&mut self, tombstone: DeletionTombstone) {
        if !self.has_tombstone(tombstone.kind, &tombstone.id) {
            self.tombstones.push(tombstone);
        }
    }

    /// Drop any tombstone for the given entity, e.g. when it is re-created
    /// after a resolved delete/update conflict.
    pub fn clear_tombstone(&mut self, kind: EntityKind, id: &str) {
        self.tombstones
            .retain(|tombstone| !(tombstone.kind == kind && tombstone.id == id));
    }

    /// Drop tombstones older than `horizon`.
    ///
    /// The engine never calls this: a safe horizon requires knowing every
    /// device's last sync time, which the manifest does not carry. Hosts
    /// that track their device fleet can prune explicitly.
    pub fn prune_tombstones_before(&mut self, horizon: DateTime<Utc>) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|tombstone| tombstone.deleted_at >= horizon);
        before - self.tombstones.len()
    }

    /// Stamp authorship and bump the version counter ahead of a write.
    pub fn stamp(&mut self, device_id: &str, device_name: &str, now: DateTime<Utc>) {
        self.schema_version = MANIFEST_SCHEMA_VERSION;
        self.version += 1;
        self.last_modified = now;
        self.last_modified_device_id = device_id.to_string();
        self.last_modified_device_name = device_name.to_string();
    }
}
