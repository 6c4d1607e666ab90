//! Error types for timetable-core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the local store, model validation and payload (de)serialization.
///
/// Relay and protocol failures have their own taxonomy in [`crate::sync::SyncError`].
#[derive(Error, Debug)]
pub enum Error {
    /// Stored data that does not fit the schema
    #[error("Database error: {0}")]
    Database(String),

    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller supplied a value the store or models reject
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
