//! Entity kinds, the ownership tree, and the type-erased sync record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The synchronizable entity collections of the moodboard library.
///
/// Serialized names match the per-kind maps in the manifest and the
/// directory names of the folder-backed remote store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    #[serde(rename = "projects")]
    Project,
    #[serde(rename = "characters")]
    Character,
    #[serde(rename = "images")]
    Image,
    #[serde(rename = "editions")]
    Edition,
    #[serde(rename = "pages")]
    Page,
    #[serde(rename = "panels")]
    Panel,
}

impl EntityKind {
    /// All kinds in ownership order (parents before children).
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Project,
        EntityKind::Character,
        EntityKind::Image,
        EntityKind::Edition,
        EntityKind::Page,
        EntityKind::Panel,
    ];

    /// Directly owned child kinds. Deleting an entity cascades through
    /// these edges; the tree is acyclic by construction.
    pub fn children(self) -> &'static [EntityKind] {
        match self {
            EntityKind::Project => &[EntityKind::Character, EntityKind::Edition],
            EntityKind::Character => &[EntityKind::Image],
            EntityKind::Edition => &[EntityKind::Page],
            EntityKind::Page => &[EntityKind::Panel],
            EntityKind::Image | EntityKind::Panel => &[],
        }
    }

    /// The plural, lowercase name used on the wire and on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Character => "characters",
            EntityKind::Image => "images",
            EntityKind::Edition => "editions",
            EntityKind::Page => "pages",
            EntityKind::Panel => "panels",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type-erased synchronizable entity.
///
/// The engine never interprets `payload` beyond hashing it; typed models in
/// [`crate::models`] convert to and from this shape. `parent_id` carries the
/// owning entity's id so stores can cascade deletions without parsing the
/// payload. Purely local bookkeeping fields must not appear in `payload`,
/// since the content hash is computed over it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: String,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl SyncRecord {
    pub fn new(
        id: impl Into<String>,
        kind: EntityKind,
        parent_id: Option<String>,
        updated_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            parent_id,
            updated_at,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_tree_is_acyclic() {
        // walk every kind to a fixed point; the tree depth is bounded
        for kind in EntityKind::ALL {
            let mut frontier = vec![kind];
            let mut steps = 0;
            while let Some(next) = frontier.pop() {
                steps += 1;
                assert!(steps < 64, "cycle reached from {kind}");
                frontier.extend(next.children());
            }
        }
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("widgets"), None);
    }

    #[test]
    fn kind_serializes_as_plural_name() {
        let json = serde_json::to_string(&EntityKind::Character).unwrap();
        assert_eq!(json, "\"characters\"");
    }
}
