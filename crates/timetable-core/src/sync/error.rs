//! Error taxonomy of the sync subsystem.

use thiserror::Error;

use crate::models::EntityType;

/// I/O or HTTP failure while talking to the relay.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("relay returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether repeating the same request later could succeed.
    ///
    /// Advisory only: the engine records it alongside the failure and relies on
    /// the next cycle re-selecting FAILED messages.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Request(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            Self::Request(error.to_string())
        }
    }
}

/// A relay document that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Outer envelope is not valid
    #[error("malformed envelope: {0}")]
    Envelope(String),
    /// The `messageData` document nested inside an envelope is not valid
    #[error("malformed message data in envelope {id}: {reason}")]
    MessageData { id: String, reason: String },
    #[error("invalid {field} in envelope {id}: {reason}")]
    InvalidField {
        id: String,
        field: &'static str,
        reason: String,
    },
    /// Response body is not an `ApiResponse`
    #[error("malformed relay response: {0}")]
    Response(String),
}

/// Failure of one sync step.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Relay answered with an application code other than 200
    #[error("relay rejected request (code {code}): {message}")]
    Application { code: i32, message: String },

    #[error("{entity_type} {crdt_key} depends on missing {parent_type} {parent_key}")]
    FkDependency {
        entity_type: EntityType,
        crdt_key: String,
        parent_type: EntityType,
        parent_key: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] crate::Error),

    #[error("no signed-in user: {0}")]
    Session(String),

    #[error("device registration failed: {0}")]
    DeviceRegistration(String),
}

impl SyncError {
    /// Retry hint for a failed upload or download.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_retryable(),
            Self::Application { code, .. } => matches!(*code, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
