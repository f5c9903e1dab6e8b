//! Error types for the sync engine

use serde::{Deserialize, Serialize};

use moodsync_core::{CoreError, EntityKind};

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Coarse error classification surfaced in [`crate::report::SyncResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncErrorKind {
    /// Offline, request failure, provider unreachable
    Network,
    /// Token invalid, expired, or revoked
    Auth,
    /// Unresolved or ambiguous conflict state
    Conflict,
    /// Malformed manifest or entity
    Validation,
    /// Already-in-progress, rate limiting, unexpected failures
    Unknown,
}

/// Errors raised while orchestrating a sync run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Another sync run holds the exclusive lock
    #[error("A sync is already in progress")]
    AlreadyInProgress,

    /// Minimum inter-sync interval has not elapsed
    #[error("Synced too recently, please wait {wait_secs}s or force")]
    RateLimited { wait_secs: i64 },

    /// The device is offline
    #[error("Device is offline")]
    Offline,

    /// Sync is disabled or no provider is configured
    #[error("Sync is not connected: {0}")]
    NotConnected(String),

    /// Remote session could not be established or refreshed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A remote call failed
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed manifest or entity content
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict handling failed or left items unresolved
    #[error("Conflict error: {0}")]
    Conflict(String),

    /// Errors from the storage seams
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Serialization of settings or the baseline cache failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::Offline | Self::Network(_) => SyncErrorKind::Network,
            Self::Auth(_) => SyncErrorKind::Auth,
            Self::Conflict(_) => SyncErrorKind::Conflict,
            Self::Validation(_) | Self::Serialization(_) => SyncErrorKind::Validation,
            Self::AlreadyInProgress | Self::RateLimited { .. } | Self::NotConnected(_) => {
                SyncErrorKind::Unknown
            }
            Self::Core(inner) => match inner {
                CoreError::Auth(_) => SyncErrorKind::Auth,
                CoreError::Serialization(_) => SyncErrorKind::Validation,
                CoreError::Io(_) | CoreError::Storage(_) => SyncErrorKind::Network,
            },
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// A captured per-entity failure. Uploads and downloads are best-effort:
/// one failing entity is recorded here and the rest of the phase continues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub kind: SyncErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_kind: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub message: String,
}

impl SyncIssue {
    pub fn from_error(error: &SyncError) -> Self {
        Self {
            kind: error.kind(),
            entity_kind: None,
            entity_id: None,
            message: error.to_string(),
        }
    }

    pub fn for_entity(error: &SyncError, kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind: error.kind(),
            entity_kind: Some(kind),
            entity_id: Some(id.into()),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify_guard_errors_as_expected() {
        assert_eq!(SyncError::Offline.kind(), SyncErrorKind::Network);
        assert_eq!(
            SyncError::AlreadyInProgress.kind(),
            SyncErrorKind::Unknown
        );
        assert_eq!(
            SyncError::RateLimited { wait_secs: 10 }.kind(),
            SyncErrorKind::Unknown
        );
        assert_eq!(
            SyncError::auth("token revoked").kind(),
            SyncErrorKind::Auth
        );
        assert_eq!(
            SyncError::validation("bad manifest").kind(),
            SyncErrorKind::Validation
        );
    }

    #[test]
    fn issue_carries_entity_context() {
        let error = SyncError::network("remote write failed");
        let issue = SyncIssue::for_entity(&error, EntityKind::Image, "img-1");
        assert_eq!(issue.kind, SyncErrorKind::Network);
        assert_eq!(issue.entity_id.as_deref(), Some("img-1"));
    }
}
