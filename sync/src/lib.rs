//! Multi-device sync engine for moodboard libraries
//!
//! Content-hash change detection against a cached baseline manifest,
//! conflict classification with pluggable resolution strategies, tombstone
//! deletion propagation, and a guarded orchestrator that drives the whole
//! run. Storage, transport, auth, and identity are seams defined in
//! `moodsync-core`; this crate contains the engine itself.

pub mod clock;
pub mod conflict;
pub mod deletion;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod progress;
pub mod report;
pub mod settings;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{
    classify_conflicts, with_timeout, ConflictHandler, ConflictResolver, ConflictSide,
    ConflictStrategy, Resolution, SyncConflict,
};
pub use engine::{SyncEngine, SyncOptions, DEFAULT_MIN_SYNC_INTERVAL_SECS};
pub use error::{Result, SyncError, SyncErrorKind, SyncIssue};
pub use progress::{ProgressChannel, ProgressReporter, SyncPhase, SyncProgress};
pub use report::{ChangeCheck, EntityCounts, SyncDirection, SyncResult};
pub use settings::{SettingsStore, SettingsUpdate, SyncSettings};
pub use trigger::{SyncRunner, SyncScheduler, SyncTrigger, TriggerConfig};
