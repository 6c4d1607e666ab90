use std::io;

use thiserror::Error;
use timetable_core::sync::SyncError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] timetable_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Not signed in. Run `timetable login <USER_ID>` first.")]
    NotSignedIn,
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Key cannot be empty")]
    EmptyKey,
    #[error("{kind} not found for key/prefix: {query}")]
    NotFound { kind: &'static str, query: String },
    #[error("{0}")]
    AmbiguousKey(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
