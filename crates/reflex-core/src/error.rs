//! Error types for the core engine.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
