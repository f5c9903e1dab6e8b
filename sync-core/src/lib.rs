//! moodsync-core - shared data model and storage seams
//!
//! This crate holds everything the sync engine and its hosts agree on:
//! entity kinds and their ownership tree, the type-erased [`SyncRecord`]
//! the engine moves between stores, the durable [`SyncManifest`] checkpoint,
//! and the collaborator traits (local store, remote store, auth, device
//! identity, connectivity, key-value settings storage). Reference
//! implementations for tests and the CLI live in [`store`] and [`fs`].

pub mod entity;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod models;
pub mod remote;
pub mod store;

pub use entity::{EntityKind, SyncRecord};
pub use error::{CoreError, Result};
pub use fs::{DirRemoteStore, FileKv};
pub use manifest::{DeletionTombstone, ItemSyncMeta, SyncManifest, MANIFEST_SCHEMA_VERSION};
pub use models::Syncable;
pub use remote::{
    AuthProvider, Connectivity, DeviceIdentity, FixedConnectivity, KvStore, RemoteStore,
    StaticAuth, StaticDevice, StoredItem,
};
pub use store::{LocalStore, MemoryKv, MemoryStore};
