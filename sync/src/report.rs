//! Structured outcome of one sync run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use moodsync_core::EntityKind;

use crate::error::SyncIssue;

/// Net direction of the transfers a run performed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Only local-to-remote transfers
    Push,
    /// Only remote-to-local transfers
    Pull,
    /// Both directions
    Merge,
    /// Nothing needed moving
    None,
}

impl SyncDirection {
    pub fn from_counts(pushed: usize, pulled: usize) -> Self {
        match (pushed > 0, pulled > 0) {
            (true, true) => Self::Merge,
            (true, false) => Self::Push,
            (false, true) => Self::Pull,
            (false, false) => Self::None,
        }
    }
}

/// Per-entity-type transfer counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityCounts {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

/// The terminal outcome of one `perform_sync` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub direction: SyncDirection,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    /// Transfers by entity type, both directions combined.
    #[serde(default)]
    pub breakdown: BTreeMap<EntityKind, EntityCounts>,
    /// Conflicts deferred to the next sync by a skip resolution.
    #[serde(default)]
    pub skipped_conflicts: usize,
    #[serde(default)]
    pub errors: Vec<SyncIssue>,
}

impl SyncResult {
    /// A run rejected by an entry guard: nothing was touched.
    pub fn failure(issue: SyncIssue, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            direction: SyncDirection::None,
            timestamp,
            duration_ms: 0,
            breakdown: BTreeMap::new(),
            skipped_conflicts: 0,
            errors: vec![issue],
        }
    }

    pub fn counts_for(&self, kind: EntityKind) -> EntityCounts {
        self.breakdown.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_transferred(&self) -> usize {
        self.breakdown.values().map(EntityCounts::total).sum()
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        let totals = self
            .breakdown
            .values()
            .fold(EntityCounts::default(), |mut acc, counts| {
                acc.added += counts.added;
                acc.updated += counts.updated;
                acc.deleted += counts.deleted;
                acc
            });
        format!(
            "{} sync ({:?}): {} added, {} updated, {} deleted, {} skipped, {} errors in {}ms",
            if self.success { "ok" } else { "failed" },
            self.direction,
            totals.added,
            totals.updated,
            totals.deleted,
            self.skipped_conflicts,
            self.errors.len(),
            self.duration_ms,
        )
    }
}

/// Outcome of the read-only `check_for_changes` dry run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCheck {
    pub has_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<SyncDirection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_counts() {
        assert_eq!(SyncDirection::from_counts(0, 0), SyncDirection::None);
        assert_eq!(SyncDirection::from_counts(2, 0), SyncDirection::Push);
        assert_eq!(SyncDirection::from_counts(0, 3), SyncDirection::Pull);
        assert_eq!(SyncDirection::from_counts(1, 1), SyncDirection::Merge);
    }

    #[test]
    fn summary_totals_span_kinds() {
        let mut result = SyncResult {
            success: true,
            direction: SyncDirection::Merge,
            timestamp: Utc::now(),
            duration_ms: 12,
            breakdown: BTreeMap::new(),
            skipped_conflicts: 1,
            errors: Vec::new(),
        };
        result.breakdown.insert(
            EntityKind::Project,
            EntityCounts {
                added: 1,
                updated: 2,
                deleted: 0,
            },
        );
        result.breakdown.insert(
            EntityKind::Image,
            EntityCounts {
                added: 0,
                updated: 0,
                deleted: 3,
            },
        );

        assert_eq!(result.total_transferred(), 6);
        let summary = result.summary();
        assert!(summary.contains("1 added"));
        assert!(summary.contains("2 updated"));
        assert!(summary.contains("3 deleted"));
    }
}
