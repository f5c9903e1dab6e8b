//! Typed entity models for the moodboard library
//!
//! These are the synchronizable fields only. Host applications may carry
//! extra local bookkeeping (view state, cached thumbnails) but such fields
//! never enter the [`SyncRecord`] payload and therefore never affect the
//! content hash.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityKind, SyncRecord};
use crate::error::{CoreError, Result};

/// Conversion between a typed model and the type-erased record the engine
/// moves around.
pub trait Syncable: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    fn updated_at(&self) -> DateTime<Utc>;

    fn to_record(&self) -> Result<SyncRecord> {
        Ok(SyncRecord::new(
            self.id(),
            Self::KIND,
            self.parent_id().map(str::to_owned),
            self.updated_at(),
            serde_json::to_value(self)?,
        ))
    }

    fn from_record(record: &SyncRecord) -> Result<Self> {
        if record.kind != Self::KIND {
            return Err(CoreError::storage(format!(
                "expected a {} record, got {}",
                Self::KIND,
                record.kind
            )));
        }
        Ok(serde_json::from_value(record.payload.clone())?)
    }
}

/// A moodboard/storytelling project, the root of the ownership tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A character within a project. Board sections and their canvas items are
/// embedded here rather than synced as separate collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub sections: Vec<BoardSection>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            notes: String::new(),
            sections: Vec::new(),
            updated_at: now,
        }
    }
}

/// A named region of a character's moodboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<CanvasItem>,
}

/// A positioned element on a board section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasItem {
    pub id: String,
    pub image_id: Option<String>,
    #[serde(default)]
    pub caption: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A reference image owned by a character.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub character_id: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A story edition (a publishable cut of the project).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edition {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// A page within an edition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub edition_id: String,
    pub number: u32,
    pub updated_at: DateTime<Utc>,
}

/// A panel on a page. Dialogue lines are embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: String,
    pub page_id: String,
    pub order: u32,
    #[serde(default)]
    pub dialogues: Vec<Dialogue>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    pub id: String,
    pub speaker: String,
    pub text: String,
}

macro_rules! impl_syncable {
    ($model:ty, $kind:expr, parent: None) => {
        impl Syncable for $model {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }
            fn parent_id(&self) -> Option<&str> {
                None
            }
            fn updated_at(&self) -> DateTime<Utc> {
                self.updated_at
            }
        }
    };
    ($model:ty, $kind:expr, parent: $field:ident) => {
        impl Syncable for $model {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }
            fn parent_id(&self) -> Option<&str> {
                Some(&self.$field)
            }
            fn updated_at(&self) -> DateTime<Utc> {
                self.updated_at
            }
        }
    };
}

impl_syncable!(Project, EntityKind::Project, parent: None);
impl_syncable!(Character, EntityKind::Character, parent: project_id);
impl_syncable!(Image, EntityKind::Image, parent: character_id);
impl_syncable!(Edition, EntityKind::Edition, parent: project_id);
impl_syncable!(Page, EntityKind::Page, parent: edition_id);
impl_syncable!(Panel, EntityKind::Panel, parent: page_id);
