use std::time::Duration;

use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A lookup by identifier found nothing. Carries what was looked up.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// The actor is not allowed to touch this chat or message.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A referenced message is missing or lives in another chat.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Participant set rules were violated.
    #[error("Invalid membership: {0}")]
    InvalidMembership(String),

    /// Input rejected before touching the database.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A store call exceeded its deadline.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking task running a store call died.
    #[error("Store task failed: {0}")]
    Task(String),

    /// A previous store call panicked while holding the connection.
    #[error("Database lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Map `QueryReturnedNoRows` to [`StoreError::NotFound`].
    pub(crate) fn or_not_found(err: rusqlite::Error, what: &'static str) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(what),
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
