//! Local storage seam and the in-memory reference implementation

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::entity::{EntityKind, SyncRecord};
use crate::error::Result;
use crate::remote::KvStore;

/// The local database seam: the engine reads the full entity set from here
/// during analysis and applies downloads and propagated deletions back.
///
/// `delete` must cascade through the ownership tree exactly as the host
/// application's own repositories cascade, so a propagated remote deletion
/// behaves like a local one.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn list(&self, kind: EntityKind) -> Result<Vec<SyncRecord>>;
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<SyncRecord>>;
    async fn put(&self, record: SyncRecord) -> Result<()>;
    /// Cascading delete. Deleting an absent id is a no-op.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;
}

/// In-memory [`LocalStore`] with cascade deletion. Reference implementation
/// for tests and the CLI, which loads a JSON library file into it.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<(EntityKind, String), SyncRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_records(records: impl IntoIterator<Item = SyncRecord>) -> Self {
        let store = Self::new();
        for record in records {
            // infallible for the in-memory map
            let _ = store.put(record).await;
        }
        store
    }

    /// Snapshot of every record, ownership order, for serialization.
    pub async fn dump(&self) -> Vec<SyncRecord> {
        let records = self.records.read().await;
        let mut all: Vec<SyncRecord> = records.values().cloned().collect();
        all.sort_by_key(|record| (record.kind, record.id.clone()));
        all
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn collect_cascade(
        records: &BTreeMap<(EntityKind, String), SyncRecord>,
        kind: EntityKind,
        id: &str,
        doomed: &mut Vec<(EntityKind, String)>,
    ) {
        doomed.push((kind, id.to_string()));
        for child_kind in kind.children() {
            let children: Vec<String> = records
                .values()
                .filter(|record| {
                    record.kind == *child_kind && record.parent_id.as_deref() == Some(id)
                })
                .map(|record| record.id.clone())
                .collect();
            for child_id in children {
                Self::collect_cascade(records, *child_kind, &child_id, doomed);
            }
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn list(&self, kind: EntityKind) -> Result<Vec<SyncRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<SyncRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(kind, id.to_string())).cloned())
    }

    async fn put(&self, record: SyncRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert((record.kind, record.id.clone()), record);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&(kind, id.to_string())) {
            return Ok(());
        }
        let mut doomed = Vec::new();
        Self::collect_cascade(&records, kind, id, &mut doomed);
        debug!(kind = %kind, id, cascade = doomed.len(), "cascading local delete");
        for key in doomed {
            records.remove(&key);
        }
        Ok(())
    }
}

/// In-memory [`KvStore`] for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(kind: EntityKind, id: &str, parent: Option<&str>) -> SyncRecord {
        SyncRecord::new(
            id,
            kind,
            parent.map(str::to_owned),
            Utc::now(),
            json!({ "id": id }),
        )
    }

    #[tokio::test]
    async fn delete_cascades_through_ownership_tree() {
        let store = MemoryStore::from_records([
            record(EntityKind::Project, "p1", None),
            record(EntityKind::Character, "c1", Some("p1")),
            record(EntityKind::Image, "i1", Some("c1")),
            record(EntityKind::Edition, "e1", Some("p1")),
            record(EntityKind::Page, "pg1", Some("e1")),
            record(EntityKind::Panel, "pn1", Some("pg1")),
            // unrelated project survives
            record(EntityKind::Project, "p2", None),
        ])
        .await;

        store.delete(EntityKind::Project, "p1").await.unwrap();

        assert_eq!(store.len().await, 1);
        assert!(store
            .get(EntityKind::Project, "p2")
            .await
            .unwrap()
            .is_some());
        assert!(store.get(EntityKind::Panel, "pn1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_mid_tree_node_spares_parent() {
        let store = MemoryStore::from_records([
            record(EntityKind::Project, "p1", None),
            record(EntityKind::Character, "c1", Some("p1")),
            record(EntityKind::Image, "i1", Some("c1")),
        ])
        .await;

        store.delete(EntityKind::Character, "c1").await.unwrap();

        assert!(store
            .get(EntityKind::Project, "p1")
            .await
            .unwrap()
            .is_some());
        assert!(store.get(EntityKind::Image, "i1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_missing_id_is_noop() {
        let store = MemoryStore::new();
        store.delete(EntityKind::Project, "ghost").await.unwrap();
        assert!(store.is_empty().await);
    }
}
