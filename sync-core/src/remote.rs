//! Collaborator seams the engine consumes
//!
//! The remote file-store provider, the identity provider, connectivity, and
//! the local key-value store are all external collaborators from the
//! engine's point of view. Everything here is a trait so hosts can plug in
//! their platform's implementation; [`crate::fs`] ships a folder-backed
//! remote store for tests and the CLI.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, SyncRecord};
use crate::error::Result;
use crate::manifest::SyncManifest;

/// Acknowledgement returned by a remote save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredItem {
    pub id: String,
}

/// The remote file-store provider: per-entity get/save/delete plus the
/// manifest. Each call is independently awaitable and independently
/// failable; the engine catches per-entity failures and continues.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<SyncRecord>>;
    async fn store(&self, record: &SyncRecord) -> Result<StoredItem>;
    async fn remove(&self, kind: EntityKind, id: &str) -> Result<()>;

    /// `None` means first sync ever: the engine assumes an empty baseline.
    async fn manifest(&self) -> Result<Option<SyncManifest>>;
    /// Full overwrite; the engine computes the complete next manifest.
    async fn save_manifest(&self, manifest: &SyncManifest) -> Result<()>;
}

/// The remote identity provider. Token refresh happens behind
/// `access_token`; any rejection is treated as a connection failure.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn is_signed_in(&self) -> bool;
    async fn access_token(&self) -> Result<String>;
    fn user_email(&self) -> Option<String>;
    fn user_id(&self) -> Option<String>;
}

/// Host-reported connectivity, the equivalent of the browser's online flag.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Stable per-installation identity used to stamp manifests and tombstones.
pub trait DeviceIdentity: Send + Sync {
    fn device_id(&self) -> String;
    fn device_name(&self) -> String;
}

/// Local key-value storage outside the synchronized database. Holds the
/// sync settings, the last-sync timestamp, and the cached baseline
/// manifest.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// An auth provider that is always signed in. Used by the CLI (where the
/// "provider" is a shared folder with no credentials) and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    pub email: Option<String>,
    pub user_id: Option<String>,
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn is_signed_in(&self) -> bool {
        true
    }

    async fn access_token(&self) -> Result<String> {
        Ok("local".to_string())
    }

    fn user_email(&self) -> Option<String> {
        self.email.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// Fixed connectivity state, switchable for tests.
#[derive(Debug, Clone)]
pub struct FixedConnectivity(pub bool);

impl Connectivity for FixedConnectivity {
    fn is_online(&self) -> bool {
        self.0
    }
}

/// A fixed device identity.
#[derive(Debug, Clone)]
pub struct StaticDevice {
    pub id: String,
    pub name: String,
}

impl StaticDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl DeviceIdentity for StaticDevice {
    fn device_id(&self) -> String {
        self.id.clone()
    }

    fn device_name(&self) -> String {
        self.name.clone()
    }
}
