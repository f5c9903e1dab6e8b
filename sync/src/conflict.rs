//! Conflict classification and resolution
//!
//! An entity changed on both sides since the baseline is a conflict; an
//! entity changed on one side only never is. Deletions count as a side:
//! deleted-here/updated-there conflicts let the resolution decide whether
//! the delete or the update wins.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use moodsync_core::EntityKind;

use crate::diff::{LocalChanges, RemoteChanges};
use crate::error::Result;

/// Strategies for resolving conflicts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Later `updated_at` wins; exact ties go to remote for convergence
    NewestWins,
    /// Local side wins unconditionally
    LocalWins,
    /// Remote side wins unconditionally
    RemoteWins,
    /// Delegate to the injected conflict handler
    Ask,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::NewestWins
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "newest-wins" => Ok(Self::NewestWins),
            "local-wins" => Ok(Self::LocalWins),
            "remote-wins" => Ok(Self::RemoteWins),
            "ask" => Ok(Self::Ask),
            other => Err(format!("unknown conflict strategy '{other}'")),
        }
    }
}

/// Per-conflict outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Local content (or local deletion) wins
    Local,
    /// Remote content (or remote deletion) wins
    Remote,
    /// Leave both sides untouched this pass; retried next sync
    Skip,
}

/// One side of a conflict: either live content metadata or a deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSide {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Content `updated_at`, or the deletion timestamp for a deleted side.
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl ConflictSide {
    pub fn content(hash: String, updated_at: DateTime<Utc>) -> Self {
        Self {
            hash: Some(hash),
            updated_at,
            deleted: false,
        }
    }

    pub fn deletion(deleted_at: DateTime<Utc>) -> Self {
        Self {
            hash: None,
            updated_at: deleted_at,
            deleted: true,
        }
    }
}

/// An entity changed on both sides since the last sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub kind: EntityKind,
    pub id: String,
    pub local: ConflictSide,
    pub remote: ConflictSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

/// Async callback that receives every pending conflict and returns the same
/// list annotated with a resolution per item. The engine suspends on it.
pub type ConflictHandler =
    Arc<dyn Fn(Vec<SyncConflict>) -> BoxFuture<'static, Result<Vec<SyncConflict>>> + Send + Sync>;

/// Find the entities changed on both sides.
///
/// Update/update, update/delete, and delete/update all conflict; a deletion
/// on both sides is agreement, not a conflict.
pub fn classify_conflicts(local: &LocalChanges, remote: &RemoteChanges) -> Vec<SyncConflict> {
    let remote_changed: HashMap<(EntityKind, &str), &crate::diff::RemoteItem> = remote
        .added
        .iter()
        .chain(remote.updated.iter())
        .map(|item| ((item.kind, item.id.as_str()), item))
        .collect();
    let remote_deleted: HashMap<(EntityKind, &str), &crate::diff::RemoteDeletion> = remote
        .deleted
        .iter()
        .map(|deletion| ((deletion.kind, deletion.id.as_str()), deletion))
        .collect();

    let mut conflicts = Vec::new();

    for item in local.added.iter().chain(local.updated.iter()) {
        let key = (item.record.kind, item.record.id.as_str());
        if let Some(remote_item) = remote_changed.get(&key) {
            conflicts.push(SyncConflict {
                kind: item.record.kind,
                id: item.record.id.clone(),
                local: ConflictSide::content(item.hash.clone(), item.record.updated_at),
                remote: ConflictSide::content(
                    remote_item.meta.hash.clone(),
                    remote_item.meta.updated_at,
                ),
                resolution: None,
            });
        } else if let Some(deletion) = remote_deleted.get(&key) {
            let deleted_at = deletion
                .tombstone
                .as_ref()
                .map_or(item.record.updated_at, |tombstone| tombstone.deleted_at);
            conflicts.push(SyncConflict {
                kind: item.record.kind,
                id: item.record.id.clone(),
                local: ConflictSide::content(item.hash.clone(), item.record.updated_at),
                remote: ConflictSide::deletion(deleted_at),
                resolution: None,
            });
        }
    }

    for tombstone in &local.deleted {
        let key = (tombstone.kind, tombstone.id.as_str());
        if let Some(remote_item) = remote_changed.get(&key) {
            conflicts.push(SyncConflict {
                kind: tombstone.kind,
                id: tombstone.id.clone(),
                local: ConflictSide::deletion(tombstone.deleted_at),
                remote: ConflictSide::content(
                    remote_item.meta.hash.clone(),
                    remote_item.meta.updated_at,
                ),
                resolution: None,
            });
        }
    }

    debug!(conflicts = conflicts.len(), "classified conflicts");
    conflicts
}

/// Applies the configured strategy to pending conflicts.
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve every conflict. For `Ask` this suspends on the handler; the
    /// resolver itself applies no timeout (wrap the handler with
    /// [`with_timeout`] at the call site if one is wanted). Conflicts the
    /// handler leaves unannotated resolve to [`Resolution::Skip`].
    pub async fn resolve(
        &self,
        conflicts: Vec<SyncConflict>,
        handler: Option<&ConflictHandler>,
    ) -> Result<Vec<SyncConflict>> {
        if conflicts.is_empty() {
            return Ok(conflicts);
        }

        match self.strategy {
            ConflictStrategy::LocalWins => Ok(annotate_all(conflicts, Resolution::Local)),
            ConflictStrategy::RemoteWins => Ok(annotate_all(conflicts, Resolution::Remote)),
            ConflictStrategy::NewestWins => Ok(conflicts
                .into_iter()
                .map(|mut conflict| {
                    // strictly greater: exact ties converge on remote
                    let winner = if conflict.local.updated_at > conflict.remote.updated_at {
                        Resolution::Local
                    } else {
                        Resolution::Remote
                    };
                    conflict.resolution = Some(winner);
                    conflict
                })
                .collect()),
            ConflictStrategy::Ask => {
                let Some(handler) = handler else {
                    warn!(
                        pending = conflicts.len(),
                        "ask strategy with no conflict handler, skipping all"
                    );
                    return Ok(annotate_all(conflicts, Resolution::Skip));
                };
                let answered = handler(conflicts.clone()).await?;
                let answers: HashMap<(EntityKind, String), Resolution> = answered
                    .into_iter()
                    .filter_map(|conflict| {
                        conflict
                            .resolution
                            .map(|resolution| ((conflict.kind, conflict.id), resolution))
                    })
                    .collect();
                Ok(conflicts
                    .into_iter()
                    .map(|mut conflict| {
                        let answer = answers
                            .get(&(conflict.kind, conflict.id.clone()))
                            .copied()
                            .unwrap_or(Resolution::Skip);
                        conflict.resolution = Some(answer);
                        conflict
                    })
                    .collect())
            }
        }
    }
}

fn annotate_all(conflicts: Vec<SyncConflict>, resolution: Resolution) -> Vec<SyncConflict> {
    conflicts
        .into_iter()
        .map(|mut conflict| {
            conflict.resolution = Some(resolution);
            conflict
        })
        .collect()
}

/// Decorate a conflict handler with a timeout. When the handler does not
/// answer in time every pending conflict resolves to skip, and the run
/// finishes instead of aborting. The engine never applies this itself;
/// timeout policy belongs to the layer that owns the UI.
pub fn with_timeout(handler: ConflictHandler, timeout: std::time::Duration) -> ConflictHandler {
    Arc::new(move |conflicts: Vec<SyncConflict>| {
        let handler = handler.clone();
        Box::pin(async move {
            match tokio::time::timeout(timeout, handler(conflicts.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        pending = conflicts.len(),
                        "conflict handler timed out, skipping all"
                    );
                    Ok(annotate_all(conflicts, Resolution::Skip))
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use test_case::test_case;

    fn conflict_at(local_offset: i64, remote_offset: i64) -> SyncConflict {
        let base = Utc::now();
        SyncConflict {
            kind: EntityKind::Project,
            id: "p1".to_string(),
            local: ConflictSide::content("local-hash".into(), base + Duration::seconds(local_offset)),
            remote: ConflictSide::content(
                "remote-hash".into(),
                base + Duration::seconds(remote_offset),
            ),
            resolution: None,
        }
    }

    #[test_case(ConflictStrategy::LocalWins, 0, 10, Resolution::Local; "local wins ignores time")]
    #[test_case(ConflictStrategy::RemoteWins, 10, 0, Resolution::Remote; "remote wins ignores time")]
    #[test_case(ConflictStrategy::NewestWins, 10, 0, Resolution::Local; "newest picks later local")]
    #[test_case(ConflictStrategy::NewestWins, 0, 10, Resolution::Remote; "newest picks later remote")]
    #[test_case(ConflictStrategy::NewestWins, 5, 5, Resolution::Remote; "exact tie converges on remote")]
    #[tokio::test]
    async fn strategy_table(
        strategy: ConflictStrategy,
        local_offset: i64,
        remote_offset: i64,
        expected: Resolution,
    ) {
        let resolver = ConflictResolver::new(strategy);
        let resolved = resolver
            .resolve(vec![conflict_at(local_offset, remote_offset)], None)
            .await
            .unwrap();
        assert_eq!(resolved[0].resolution, Some(expected));
    }

    #[tokio::test]
    async fn ask_without_handler_skips() {
        let resolver = ConflictResolver::new(ConflictStrategy::Ask);
        let resolved = resolver
            .resolve(vec![conflict_at(0, 0)], None)
            .await
            .unwrap();
        assert_eq!(resolved[0].resolution, Some(Resolution::Skip));
    }

    #[tokio::test]
    async fn ask_merges_handler_answers_and_defaults_missing_to_skip() {
        let resolver = ConflictResolver::new(ConflictStrategy::Ask);
        let mut first = conflict_at(0, 0);
        first.id = "p1".to_string();
        let mut second = conflict_at(0, 0);
        second.id = "p2".to_string();

        let handler: ConflictHandler = Arc::new(|mut conflicts: Vec<SyncConflict>| {
            Box::pin(async move {
                // answer only the first conflict
                conflicts[0].resolution = Some(Resolution::Local);
                conflicts.truncate(1);
                Ok(conflicts)
            })
        });

        let resolved = resolver
            .resolve(vec![first, second], Some(&handler))
            .await
            .unwrap();
        assert_eq!(resolved[0].resolution, Some(Resolution::Local));
        assert_eq!(resolved[1].resolution, Some(Resolution::Skip));
    }

    #[tokio::test]
    async fn timeout_decorator_skips_unanswered() {
        let handler: ConflictHandler = Arc::new(|conflicts: Vec<SyncConflict>| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(conflicts)
            })
        });
        let handler = with_timeout(handler, std::time::Duration::from_millis(20));

        let resolver = ConflictResolver::new(ConflictStrategy::Ask);
        let resolved = resolver
            .resolve(vec![conflict_at(0, 0)], Some(&handler))
            .await
            .unwrap();
        assert_eq!(resolved[0].resolution, Some(Resolution::Skip));
    }

    #[test]
    fn deletion_vs_update_is_a_conflict() {
        use crate::diff::{LocalChanges, RemoteChanges, RemoteItem};
        use moodsync_core::{ItemSyncMeta, SyncRecord};
        use serde_json::json;

        let now = Utc::now();
        let record = SyncRecord::new("x1", EntityKind::Image, None, now, json!({"id": "x1"}));
        let local = LocalChanges {
            deleted: vec![moodsync_core::DeletionTombstone {
                id: "x1".to_string(),
                kind: EntityKind::Image,
                deleted_at: now,
                deleted_by_device_id: "device-a".to_string(),
            }],
            ..Default::default()
        };
        let remote = RemoteChanges {
            updated: vec![RemoteItem {
                kind: EntityKind::Image,
                id: "x1".to_string(),
                meta: ItemSyncMeta {
                    id: "x1".to_string(),
                    hash: crate::hasher::hash_record(&record),
                    updated_at: now + Duration::seconds(1),
                    version: 2,
                },
            }],
            ..Default::default()
        };

        let conflicts = classify_conflicts(&local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].local.deleted);
        assert!(!conflicts[0].remote.deleted);
    }

    #[test]
    fn one_sided_changes_are_not_conflicts() {
        use crate::diff::{LocalChanges, LocalItem, RemoteChanges};
        use moodsync_core::SyncRecord;
        use serde_json::json;

        let now = Utc::now();
        let record = SyncRecord::new("a1", EntityKind::Project, None, now, json!({"id": "a1"}));
        let local = LocalChanges {
            added: vec![LocalItem {
                hash: crate::hasher::hash_record(&record),
                record,
            }],
            ..Default::default()
        };
        let remote = RemoteChanges::default();

        assert!(classify_conflicts(&local, &remote).is_empty());
    }
}
