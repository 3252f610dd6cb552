//! Muninn error types

/// Muninn error types
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
