//! Error taxonomy for the memory core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Raised only by operations that require the chat to exist.
    #[error("Chat not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Summarizer failure or timeout. Recovered inside the scheduler and never
    /// returned from message append.
    #[error("Analysis error: {0}")]
    Analysis(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
