//! Error types for voyage-memory

use thiserror::Error;

/// Main error type for memory operations
#[derive(Error, Debug)]
pub enum VoyageError {
    /// Snapshot persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Language model collaborator errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Memory operation errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for VoyageError {
    fn from(err: serde_json::Error) -> Self {
        VoyageError::Serialization(err.to_string())
    }
}

impl From<crate::llm::LlmError> for VoyageError {
    fn from(err: crate::llm::LlmError) -> Self {
        VoyageError::Llm(err.to_string())
    }
}

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, VoyageError>;
