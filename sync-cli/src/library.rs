//! The library file: every synced entity collection in one JSON document,
//! keyed by collection name. Missing file means an empty library.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use moodsync_core::{EntityKind, MemoryStore, SyncRecord};

type Library = BTreeMap<EntityKind, Vec<SyncRecord>>;

pub async fn load_store(path: &Path) -> Result<MemoryStore> {
    if !path.exists() {
        return Ok(MemoryStore::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading library file {}", path.display()))?;
    let library: Library = serde_json::from_str(&raw)
        .with_context(|| format!("parsing library file {}", path.display()))?;
    Ok(MemoryStore::from_records(library.into_values().flatten()).await)
}

pub async fn save_store(path: &Path, store: &MemoryStore) -> Result<()> {
    let mut library = Library::new();
    for record in store.dump().await {
        library.entry(record.kind).or_default().push(record);
    }
    let json = serde_json::to_string_pretty(&library)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing library file {}", path.display()))?;
    Ok(())
}
