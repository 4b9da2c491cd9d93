//! Error types for the behavior-tree runtime.

#[derive(Debug, thiserror::Error)]
pub enum BtError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Tree not found: {0}")]
    TreeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for behavior-tree operations.
pub type Result<T> = std::result::Result<T, BtError>;
