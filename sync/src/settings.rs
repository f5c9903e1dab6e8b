//! Persisted sync configuration and per-device sync state
//!
//! Settings, the last-sync timestamp, and the cached baseline manifest all
//! live in the host's key-value store, outside the synchronized database,
//! so they never sync themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use moodsync_core::{DeviceIdentity, KvStore, SyncManifest};

use crate::conflict::ConflictStrategy;
use crate::error::Result;

const SETTINGS_KEY: &str = "sync.settings";
const LAST_SYNC_KEY: &str = "sync.last_sync_at";
const BASELINE_KEY: &str = "sync.baseline_manifest";

/// Device-level sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default)]
    pub enabled: bool,
    /// The active remote provider, `None` while disconnected.
    #[serde(default)]
    pub provider: Option<String>,
    pub device_id: String,
    pub device_name: String,
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u32,
    #[serde(default)]
    pub sync_on_startup: bool,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

fn default_auto_sync() -> bool {
    true
}

fn default_sync_interval_minutes() -> u32 {
    15
}

impl SyncSettings {
    /// Fresh defaults stamped with this installation's identity.
    pub fn defaults_for(device: &dyn DeviceIdentity) -> Self {
        Self {
            enabled: false,
            provider: None,
            device_id: device.device_id(),
            device_name: device.device_name(),
            auto_sync: default_auto_sync(),
            sync_interval_minutes: default_sync_interval_minutes(),
            sync_on_startup: false,
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

/// Partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub provider: Option<Option<String>>,
    pub device_name: Option<String>,
    pub auto_sync: Option<bool>,
    pub sync_interval_minutes: Option<u32>,
    pub sync_on_startup: Option<bool>,
    pub conflict_strategy: Option<ConflictStrategy>,
}

/// Settings and sync-state accessors over the key-value seam.
#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn KvStore>,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn load(&self) -> Result<Option<SyncSettings>> {
        match self.kv.get(SETTINGS_KEY).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, settings: &SyncSettings) -> Result<()> {
        self.kv
            .set(SETTINGS_KEY, &serde_json::to_string(settings)?)
            .await?;
        Ok(())
    }

    /// Load settings, creating defaults for this device on first run.
    pub async fn initialize(&self, device: &dyn DeviceIdentity) -> Result<SyncSettings> {
        if let Some(settings) = self.load().await? {
            return Ok(settings);
        }
        let settings = SyncSettings::defaults_for(device);
        debug!(device_id = %settings.device_id, "initialized default sync settings");
        self.save(&settings).await?;
        Ok(settings)
    }

    /// Apply a partial update on top of the stored settings.
    pub async fn update(
        &self,
        device: &dyn DeviceIdentity,
        update: SettingsUpdate,
    ) -> Result<SyncSettings> {
        let mut settings = self.initialize(device).await?;
        if let Some(enabled) = update.enabled {
            settings.enabled = enabled;
        }
        if let Some(provider) = update.provider {
            settings.provider = provider;
        }
        if let Some(device_name) = update.device_name {
            settings.device_name = device_name;
        }
        if let Some(auto_sync) = update.auto_sync {
            settings.auto_sync = auto_sync;
        }
        if let Some(interval) = update.sync_interval_minutes {
            settings.sync_interval_minutes = interval;
        }
        if let Some(on_startup) = update.sync_on_startup {
            settings.sync_on_startup = on_startup;
        }
        if let Some(strategy) = update.conflict_strategy {
            settings.conflict_strategy = strategy;
        }
        self.save(&settings).await?;
        Ok(settings)
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.kv.get(LAST_SYNC_KEY).await? {
            Some(raw) => {
                let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|err| {
                    crate::error::SyncError::validation(format!(
                        "bad last-sync timestamp '{raw}': {err}"
                    ))
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.kv.set(LAST_SYNC_KEY, &at.to_rfc3339()).await?;
        Ok(())
    }

    /// The cached baseline: the manifest as of this device's last
    /// successful sync. Empty before the first sync.
    pub async fn baseline(&self) -> Result<SyncManifest> {
        match self.kv.get(BASELINE_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SyncManifest::empty()),
        }
    }

    pub async fn save_baseline(&self, baseline: &SyncManifest) -> Result<()> {
        self.kv
            .set(BASELINE_KEY, &serde_json::to_string(baseline)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodsync_core::{MemoryKv, StaticDevice};

    fn store() -> SettingsStore {
        SettingsStore::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn initialize_seeds_device_identity_once() {
        let store = store();
        let device = StaticDevice::new("device-a", "Studio Laptop");

        let first = store.initialize(&device).await.unwrap();
        assert_eq!(first.device_id, "device-a");
        assert!(!first.enabled);
        assert_eq!(first.conflict_strategy, ConflictStrategy::NewestWins);

        // a second device identity does not overwrite stored settings
        let other = StaticDevice::new("device-b", "Phone");
        let second = store.initialize(&other).await.unwrap();
        assert_eq!(second.device_id, "device-a");
    }

    #[tokio::test]
    async fn partial_update_keeps_unset_fields() {
        let store = store();
        let device = StaticDevice::new("device-a", "Studio Laptop");
        store.initialize(&device).await.unwrap();

        let updated = store
            .update(
                &device,
                SettingsUpdate {
                    enabled: Some(true),
                    provider: Some(Some("folder".to_string())),
                    conflict_strategy: Some(ConflictStrategy::LocalWins),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.enabled);
        assert_eq!(updated.provider.as_deref(), Some("folder"));
        assert_eq!(updated.conflict_strategy, ConflictStrategy::LocalWins);
        assert_eq!(updated.sync_interval_minutes, 15);
    }

    #[tokio::test]
    async fn last_sync_round_trip() {
        let store = store();
        assert!(store.last_sync_at().await.unwrap().is_none());

        let at = Utc::now();
        store.set_last_sync_at(at).await.unwrap();
        let loaded = store.last_sync_at().await.unwrap().unwrap();
        assert_eq!(loaded.timestamp_millis(), at.timestamp_millis());
    }

    #[tokio::test]
    async fn baseline_defaults_to_empty() {
        let store = store();
        let baseline = store.baseline().await.unwrap();
        assert_eq!(baseline.item_count(), 0);

        let mut manifest = SyncManifest::empty();
        manifest.stamp("device-a", "Laptop", Utc::now());
        store.save_baseline(&manifest).await.unwrap();
        assert_eq!(store.baseline().await.unwrap(), manifest);
    }
}
