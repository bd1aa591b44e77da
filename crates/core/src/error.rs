//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid declared size: {size} (must be between 1 and {max})")]
    InvalidDeclaredSize { size: i64, max: u64 },

    #[error("invalid chunk count: {count} (must be between 1 and {max})")]
    InvalidChunkCount { count: i64, max: u32 },

    #[error("invalid chunk index: {index} (session expects {total} chunks)")]
    InvalidChunkIndex { index: i64, total: u32 },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
