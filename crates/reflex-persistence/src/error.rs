//! Error types for the persistence crate.

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Duplicate record id: {0}")]
    Duplicate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
