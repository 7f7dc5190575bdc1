use coffer_shared::error::{TimestampError, TrieError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating or removing a database file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A group id that cannot name storage on disk.
    #[error("Invalid group id: {0}")]
    InvalidGroup(String),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The persisted trie document could not be read or written.
    #[error("Merkle error: {0}")]
    Trie(#[from] TrieError),

    /// A stored timestamp is not in canonical form.
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    /// Stored encryption metadata is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
