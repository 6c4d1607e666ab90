//! Sync message model: one recorded mutation of one logical entity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::sync::HlcTimestamp;

/// Kind of entity a message mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Table,
    Course,
    CourseNode,
    OrdinarySchedule,
    TimeSlot,
    User,
}

impl EntityType {
    /// Types exchanged with the relay in this protocol version.
    pub const SUPPORTED: [Self; 5] = [
        Self::Table,
        Self::Course,
        Self::CourseNode,
        Self::OrdinarySchedule,
        Self::TimeSlot,
    ];

    /// Order in which downloaded groups are applied; parents precede children.
    pub const DEPENDENCY_ORDER: [Self; 6] = [
        Self::User,
        Self::Table,
        Self::Course,
        Self::CourseNode,
        Self::OrdinarySchedule,
        Self::TimeSlot,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::Course => "COURSE",
            Self::CourseNode => "COURSE_NODE",
            Self::OrdinarySchedule => "ORDINARY_SCHEDULE",
            Self::TimeSlot => "TIME_SLOT",
            Self::User => "USER",
        }
    }

    /// Whether this type is fetched from and pushed to the relay.
    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }

    /// Position in [`Self::DEPENDENCY_ORDER`].
    pub fn dependency_rank(self) -> usize {
        Self::DEPENDENCY_ORDER
            .iter()
            .position(|entity_type| *entity_type == self)
            .unwrap_or(usize::MAX)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TABLE" => Ok(Self::Table),
            "COURSE" => Ok(Self::Course),
            "COURSE_NODE" => Ok(Self::CourseNode),
            "ORDINARY_SCHEDULE" => Ok(Self::OrdinarySchedule),
            "TIME_SLOT" => Ok(Self::TimeSlot),
            "USER" => Ok(Self::User),
            other => Err(Error::InvalidInput(format!("unknown entity type '{other}'"))),
        }
    }
}

/// Mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown operation type '{other}'"
            ))),
        }
    }
}

/// Delivery state of a message.
///
/// Moves forward only: `Pending`/`Failed` to `Synced`/`Failed`, then `Synced`
/// to `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    Processed,
}

impl SyncStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Synced, Self::Failed, Self::Processed];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Synced => "SYNCED",
            Self::Failed => "FAILED",
            Self::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SYNCED" => Ok(Self::Synced),
            "FAILED" => Ok(Self::Failed),
            "PROCESSED" => Ok(Self::Processed),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// A recorded mutation, either produced locally (outbox) or received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Message identifier (UUID v7 for locally produced messages)
    pub id: String,
    /// Stable identifier of the logical entity
    pub crdt_key: String,
    pub entity_type: EntityType,
    pub operation_type: OperationType,
    pub origin_device_id: String,
    pub hlc_timestamp: HlcTimestamp,
    /// Serialized entity snapshot (JSON)
    pub payload: String,
    pub user_id: i64,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl SyncMessage {
    /// Create a PENDING message for a local mutation.
    pub fn new_local(
        crdt_key: impl Into<String>,
        entity_type: EntityType,
        operation_type: OperationType,
        hlc_timestamp: HlcTimestamp,
        payload: impl Into<String>,
        user_id: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            crdt_key: crdt_key.into(),
            entity_type,
            operation_type,
            origin_device_id: hlc_timestamp.node_id.clone(),
            hlc_timestamp,
            payload: payload.into(),
            user_id,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rank of this write among all writes to the same `crdt_key`.
    ///
    /// Built only from fields that survive the wire, so the writer and every
    /// peer order the same pair of writes identically. Within one millisecond
    /// of one device the time-ordered message id breaks the tie.
    pub fn version_rank(&self) -> (i64, &str, &str) {
        (
            self.hlc_timestamp.wall_clock,
            self.hlc_timestamp.node_id.as_str(),
            self.id.as_str(),
        )
    }

    /// Whether cleanup may remove this message once it is old enough.
    pub const fn is_cleanup_eligible(&self) -> bool {
        matches!(self.sync_status, SyncStatus::Synced | SyncStatus::Processed)
    }
}
