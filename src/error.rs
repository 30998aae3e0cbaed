//! Error types for the collection engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collection is already indexing")]
    AlreadyIndexing,

    #[error("Build incomplete: {0}")]
    BuildIncomplete(String),

    #[error("Corrupt collection state: {0}")]
    Corrupt(String),

    #[error("Metadata extractor unavailable: {0}")]
    ExtractorUnavailable(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub(crate) fn poisoned() -> Self {
        EngineError::State("Poisoned lock".into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
