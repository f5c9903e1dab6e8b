//! Three-way change detection
//!
//! Both detectors compare against the baseline: the locally cached copy of
//! the manifest as of this device's last successful sync. The local
//! detector walks the actual entity collections; the remote detector only
//! needs the freshly fetched manifest, since the provider's metadata is
//! authoritative for "has this item changed".

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use moodsync_core::{DeletionTombstone, EntityKind, SyncManifest, SyncRecord};

use crate::hasher;

/// A locally changed entity together with its freshly computed hash.
#[derive(Debug, Clone)]
pub struct LocalItem {
    pub record: SyncRecord,
    pub hash: String,
}

/// Disjoint classification of the local entity set against the baseline.
#[derive(Debug, Clone, Default)]
pub struct LocalChanges {
    /// Present locally, no baseline entry.
    pub added: Vec<LocalItem>,
    /// Baseline entry exists but hash or timestamp differs.
    pub updated: Vec<LocalItem>,
    /// Baseline entry exists, entity is gone locally, and no tombstone was
    /// recorded yet. One tombstone is minted per deletion.
    pub deleted: Vec<DeletionTombstone>,
    pub unchanged: usize,
}

impl LocalChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Classify every local collection against the baseline manifest.
///
/// An entity present locally but absent from the baseline is unambiguously
/// a local add; no remote round-trip is needed.
pub fn detect_local_changes(
    records: &HashMap<EntityKind, Vec<SyncRecord>>,
    baseline: &SyncManifest,
    device_id: &str,
    now: DateTime<Utc>,
) -> LocalChanges {
    let mut changes = LocalChanges::default();

    for kind in EntityKind::ALL {
        let empty = Vec::new();
        let local = records.get(&kind).unwrap_or(&empty);
        let mut seen: HashMap<&str, ()> = HashMap::with_capacity(local.len());

        for record in local {
            seen.insert(record.id.as_str(), ());
            let hash = hasher::hash_record(record);
            match baseline.get(kind, &record.id) {
                None => changes.added.push(LocalItem {
                    record: record.clone(),
                    hash,
                }),
                Some(meta) if meta.hash != hash || meta.updated_at != record.updated_at => {
                    changes.updated.push(LocalItem {
                        record: record.clone(),
                        hash,
                    });
                }
                Some(_) => changes.unchanged += 1,
            }
        }

        for id in baseline.ids_of(kind) {
            if !seen.contains_key(id) && !baseline.has_tombstone(kind, id) {
                changes.deleted.push(DeletionTombstone {
                    id: id.to_string(),
                    kind,
                    deleted_at: now,
                    deleted_by_device_id: device_id.to_string(),
                });
            }
        }
    }

    changes
}

/// A remotely changed entity, known only by its manifest metadata until the
/// download phase fetches the content.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub kind: EntityKind,
    pub id: String,
    pub meta: moodsync_core::ItemSyncMeta,
}

/// A deletion observed on the remote side, either implied by the item's
/// absence from the current manifest or carried by an explicit tombstone.
#[derive(Debug, Clone)]
pub struct RemoteDeletion {
    pub kind: EntityKind,
    pub id: String,
    pub tombstone: Option<DeletionTombstone>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteChanges {
    pub added: Vec<RemoteItem>,
    pub updated: Vec<RemoteItem>,
    pub deleted: Vec<RemoteDeletion>,
}

impl RemoteChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Classify the fetched remote manifest against the baseline. Symmetric to
/// [`detect_local_changes`] but purely metadata-driven.
///
/// Deletions originated by this device are excluded; they are this
/// device's own tombstones coming back around.
pub fn detect_remote_changes(
    remote: &SyncManifest,
    baseline: &SyncManifest,
    device_id: &str,
) -> RemoteChanges {
    let mut changes = RemoteChanges::default();

    for (kind, items) in &remote.items {
        for (id, meta) in items {
            match baseline.get(*kind, id) {
                None => changes.added.push(RemoteItem {
                    kind: *kind,
                    id: id.clone(),
                    meta: meta.clone(),
                }),
                Some(base) if base.hash != meta.hash || base.updated_at != meta.updated_at => {
                    changes.updated.push(RemoteItem {
                        kind: *kind,
                        id: id.clone(),
                        meta: meta.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    // implied deletions: known at last sync, gone from the remote manifest
    for (kind, items) in &baseline.items {
        for id in items.keys() {
            if remote.get(*kind, id).is_none() {
                let tombstone = remote
                    .tombstones
                    .iter()
                    .find(|tombstone| tombstone.kind == *kind && &tombstone.id == id)
                    .cloned();
                if tombstone
                    .as_ref()
                    .is_some_and(|t| t.deleted_by_device_id == device_id)
                {
                    continue;
                }
                changes.deleted.push(RemoteDeletion {
                    kind: *kind,
                    id: id.clone(),
                    tombstone,
                });
            }
        }
    }

    // explicit tombstones new since the baseline, for entities the baseline
    // never tracked (e.g. created and deleted elsewhere between our syncs)
    for tombstone in &remote.tombstones {
        if tombstone.deleted_by_device_id == device_id
            || baseline.has_tombstone(tombstone.kind, &tombstone.id)
            || baseline.get(tombstone.kind, &tombstone.id).is_some()
        {
            continue;
        }
        let already = changes
            .deleted
            .iter()
            .any(|deletion| deletion.kind == tombstone.kind && deletion.id == tombstone.id);
        if !already {
            changes.deleted.push(RemoteDeletion {
                kind: tombstone.kind,
                id: tombstone.id.clone(),
                tombstone: Some(tombstone.clone()),
            });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodsync_core::ItemSyncMeta;
    use serde_json::json;

    fn record(kind: EntityKind, id: &str, title: &str, updated_at: DateTime<Utc>) -> SyncRecord {
        SyncRecord::new(
            id,
            kind,
            None,
            updated_at,
            json!({ "id": id, "title": title }),
        )
    }

    fn meta_for(record: &SyncRecord) -> ItemSyncMeta {
        ItemSyncMeta {
            id: record.id.clone(),
            hash: hasher::hash_record(record),
            updated_at: record.updated_at,
            version: 1,
        }
    }

    fn records_map(records: Vec<SyncRecord>) -> HashMap<EntityKind, Vec<SyncRecord>> {
        let mut map: HashMap<EntityKind, Vec<SyncRecord>> = HashMap::new();
        for record in records {
            map.entry(record.kind).or_default().push(record);
        }
        map
    }

    #[test]
    fn classifies_local_sets_disjointly() {
        let now = Utc::now();
        let unchanged = record(EntityKind::Project, "p1", "same", now);
        let updated_old = record(EntityKind::Project, "p2", "old", now);
        let updated_new = record(EntityKind::Project, "p2", "new", now + chrono::Duration::seconds(5));
        let added = record(EntityKind::Character, "c1", "fresh", now);
        let gone = record(EntityKind::Image, "i1", "bye", now);

        let mut baseline = SyncManifest::empty();
        baseline.upsert(EntityKind::Project, meta_for(&unchanged));
        baseline.upsert(EntityKind::Project, meta_for(&updated_old));
        baseline.upsert(EntityKind::Image, meta_for(&gone));

        let locals = records_map(vec![unchanged, updated_new, added]);
        let changes = detect_local_changes(&locals, &baseline, "device-a", now);

        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].record.id, "c1");
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].record.id, "p2");
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].id, "i1");
        assert_eq!(changes.deleted[0].deleted_by_device_id, "device-a");
    }

    #[test]
    fn no_duplicate_tombstone_for_known_deletion() {
        let now = Utc::now();
        let gone = record(EntityKind::Image, "i1", "bye", now);
        let mut baseline = SyncManifest::empty();
        baseline.upsert(EntityKind::Image, meta_for(&gone));
        baseline.push_tombstone(DeletionTombstone {
            id: "i1".to_string(),
            kind: EntityKind::Image,
            deleted_at: now,
            deleted_by_device_id: "device-a".to_string(),
        });

        let changes = detect_local_changes(&HashMap::new(), &baseline, "device-a", now);
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn remote_added_updated_deleted() {
        let now = Utc::now();
        let kept = record(EntityKind::Project, "p1", "same", now);
        let changed_old = record(EntityKind::Project, "p2", "old", now);
        let changed_new = record(EntityKind::Project, "p2", "new", now);
        let fresh = record(EntityKind::Page, "pg1", "new page", now);
        let dropped = record(EntityKind::Panel, "pn1", "gone", now);

        let mut baseline = SyncManifest::empty();
        baseline.upsert(EntityKind::Project, meta_for(&kept));
        baseline.upsert(EntityKind::Project, meta_for(&changed_old));
        baseline.upsert(EntityKind::Panel, meta_for(&dropped));

        let mut remote = SyncManifest::empty();
        remote.upsert(EntityKind::Project, meta_for(&kept));
        remote.upsert(EntityKind::Project, meta_for(&changed_new));
        remote.upsert(EntityKind::Page, meta_for(&fresh));
        remote.push_tombstone(DeletionTombstone {
            id: "pn1".to_string(),
            kind: EntityKind::Panel,
            deleted_at: now,
            deleted_by_device_id: "device-b".to_string(),
        });

        let changes = detect_remote_changes(&remote, &baseline, "device-a");

        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].id, "pg1");
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].id, "p2");
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].id, "pn1");
        assert!(changes.deleted[0].tombstone.is_some());
    }

    #[test]
    fn own_tombstones_do_not_echo_back() {
        let now = Utc::now();
        let dropped = record(EntityKind::Image, "i1", "gone", now);
        let mut baseline = SyncManifest::empty();
        baseline.upsert(EntityKind::Image, meta_for(&dropped));

        let mut remote = SyncManifest::empty();
        remote.push_tombstone(DeletionTombstone {
            id: "i1".to_string(),
            kind: EntityKind::Image,
            deleted_at: now,
            deleted_by_device_id: "device-a".to_string(),
        });

        let changes = detect_remote_changes(&remote, &baseline, "device-a");
        assert!(changes.deleted.is_empty());
    }
}
