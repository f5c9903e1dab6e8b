//! Folder-backed remote store
//!
//! A shared directory standing in for the cloud file-store provider: one
//! JSON file per entity under a per-kind subdirectory, plus `manifest.json`
//! at the root. Used by the CLI (sync through a synced folder) and by
//! integration tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::entity::{EntityKind, SyncRecord};
use crate::error::{CoreError, Result};
use crate::manifest::SyncManifest;
use crate::remote::{KvStore, RemoteStore, StoredItem};

#[derive(Debug, Clone)]
pub struct DirRemoteStore {
    root: PathBuf,
}

impl DirRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entity_path(&self, kind: EntityKind, id: &str) -> Result<PathBuf> {
        // ids become file names; reject anything that could escape the root
        if id.is_empty() || id.contains(['/', '\\', '.']) {
            return Err(CoreError::storage(format!("invalid entity id '{id}'")));
        }
        Ok(self.root.join(kind.as_str()).join(format!("{id}.json")))
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    async fn write_json(&self, path: &Path, json: String) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // write-then-rename so readers never observe a partial file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<SyncRecord>> {
        let path = self.entity_path(kind, id)?;
        match fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(&self, record: &SyncRecord) -> Result<StoredItem> {
        let path = self.entity_path(record.kind, &record.id)?;
        self.write_json(&path, serde_json::to_string_pretty(record)?)
            .await?;
        debug!(kind = %record.kind, id = %record.id, "stored remote entity");
        Ok(StoredItem {
            id: record.id.clone(),
        })
    }

    async fn remove(&self, kind: EntityKind, id: &str) -> Result<()> {
        let path = self.entity_path(kind, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn manifest(&self) -> Result<Option<SyncManifest>> {
        match fs::read_to_string(self.manifest_path()).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_manifest(&self, manifest: &SyncManifest) -> Result<()> {
        self.write_json(
            &self.manifest_path(),
            serde_json::to_string_pretty(manifest)?,
        )
        .await
    }
}

/// JSON-file [`KvStore`] for the CLI's per-device sync state.
#[derive(Debug, Clone)]
pub struct FileKv {
    path: PathBuf,
    lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl FileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    async fn load(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(serde_json::Map::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, values: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(values)?).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let values = self.load().await?;
        Ok(values
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        self.save(&values).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.remove(key);
        self.save(&values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str) -> SyncRecord {
        SyncRecord::new(
            id,
            EntityKind::Project,
            None,
            Utc::now(),
            json!({ "id": id, "title": "Test" }),
        )
    }

    #[tokio::test]
    async fn entity_round_trip_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = DirRemoteStore::new(dir.path());

        assert!(store
            .fetch(EntityKind::Project, "p1")
            .await
            .unwrap()
            .is_none());

        let saved = store.store(&record("p1")).await.unwrap();
        assert_eq!(saved.id, "p1");

        let fetched = store
            .fetch(EntityKind::Project, "p1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, "p1");

        store.remove(EntityKind::Project, "p1").await.unwrap();
        assert!(store
            .fetch(EntityKind::Project, "p1")
            .await
            .unwrap()
            .is_none());
        // removing again is fine
        store.remove(EntityKind::Project, "p1").await.unwrap();
    }

    #[tokio::test]
    async fn manifest_overwrite_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DirRemoteStore::new(dir.path());

        assert!(store.manifest().await.unwrap().is_none());

        let mut manifest = SyncManifest::empty();
        manifest.stamp("device-a", "Laptop", Utc::now());
        store.save_manifest(&manifest).await.unwrap();

        let loaded = store.manifest().await.unwrap().unwrap();
        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn rejects_path_escaping_ids() {
        let dir = TempDir::new().unwrap();
        let store = DirRemoteStore::new(dir.path());
        assert!(store.fetch(EntityKind::Project, "../evil").await.is_err());
    }

    #[tokio::test]
    async fn file_kv_round_trip() {
        let dir = TempDir::new().unwrap();
        let kv = FileKv::new(dir.path().join("state.json"));

        assert!(kv.get("k").await.unwrap().is_none());
        kv.set("k", "v").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        kv.delete("k").await.unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
    }
}
