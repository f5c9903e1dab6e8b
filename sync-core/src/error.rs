//! Error types shared by the storage seams

/// Result type alias for core storage operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by local/remote store implementations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// IO errors from file-backed stores
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage-level failures with context
    #[error("Storage error: {0}")]
    Storage(String),

    /// Authentication failures from the auth provider
    #[error("Auth error: {0}")]
    Auth(String),
}

impl CoreError {
    /// Create a storage error with context
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an auth error with context
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}
