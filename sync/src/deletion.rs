//! Deletion propagation
//!
//! Local deletions become tombstones in the shared manifest so every other
//! device applies the same delete on its next sync. Remote tombstones are
//! applied through the local store's cascading delete, so a propagated
//! deletion removes owned children exactly like a local one.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use moodsync_core::{DeletionTombstone, EntityKind, LocalStore};

use crate::error::{SyncError, SyncIssue};

/// Record a deletion observed while the entity still exists locally, e.g.
/// when the host app deletes a synced entity between runs. Hosts that want
/// eager tombstones (rather than waiting for detection at the next sync)
/// call this from their delete path.
pub fn tombstone_for(
    kind: EntityKind,
    id: impl Into<String>,
    device_id: impl Into<String>,
    deleted_at: DateTime<Utc>,
) -> DeletionTombstone {
    DeletionTombstone {
        id: id.into(),
        kind,
        deleted_at,
        deleted_by_device_id: device_id.into(),
    }
}

/// Apply remote deletions to the local store, best-effort. Entities already
/// absent are silently fine; failures are captured per entity and do not
/// stop the rest. Returns the keys that were actually applied.
pub async fn apply_remote_deletions(
    local: &dyn LocalStore,
    deletions: impl IntoIterator<Item = (EntityKind, String)>,
    issues: &mut Vec<SyncIssue>,
) -> Vec<(EntityKind, String)> {
    let mut applied = Vec::new();
    for (kind, id) in deletions {
        match local.delete(kind, &id).await {
            Ok(()) => {
                debug!(kind = %kind, id = %id, "applied remote deletion");
                applied.push((kind, id));
            }
            Err(err) => {
                warn!(kind = %kind, id = %id, error = %err, "failed to apply remote deletion");
                issues.push(SyncIssue::for_entity(&SyncError::Core(err), kind, id));
            }
        }
    }
    applied
}
