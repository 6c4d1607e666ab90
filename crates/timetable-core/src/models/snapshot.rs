//! Typed entity snapshots carried as sync message payloads.

use crate::error::{Error, Result};

use super::{Course, CourseNode, EntityType, LocalUser, OrdinarySchedule, Table, TimeSlot};

/// Full state of one entity, as serialized into a message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EntitySnapshot {
    User(LocalUser),
    Table(Table),
    Course(Course),
    CourseNode(CourseNode),
    OrdinarySchedule(OrdinarySchedule),
    TimeSlot(TimeSlot),
}

impl EntitySnapshot {
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::User(_) => EntityType::User,
            Self::Table(_) => EntityType::Table,
            Self::Course(_) => EntityType::Course,
            Self::CourseNode(_) => EntityType::CourseNode,
            Self::OrdinarySchedule(_) => EntityType::OrdinarySchedule,
            Self::TimeSlot(_) => EntityType::TimeSlot,
        }
    }

    /// Key of the logical entity. Users are keyed by their numeric id.
    pub fn crdt_key(&self) -> String {
        match self {
            Self::User(user) => user_crdt_key(user.user_id),
            Self::Table(table) => table.crdt_key.clone(),
            Self::Course(course) => course.crdt_key.clone(),
            Self::CourseNode(node) => node.crdt_key.clone(),
            Self::OrdinarySchedule(schedule) => schedule.crdt_key.clone(),
            Self::TimeSlot(slot) => slot.crdt_key.clone(),
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        let payload = match self {
            Self::User(user) => serde_json::to_string(user)?,
            Self::Table(table) => serde_json::to_string(table)?,
            Self::Course(course) => serde_json::to_string(course)?,
            Self::CourseNode(node) => serde_json::to_string(node)?,
            Self::OrdinarySchedule(schedule) => serde_json::to_string(schedule)?,
            Self::TimeSlot(slot) => serde_json::to_string(slot)?,
        };
        Ok(payload)
    }

    /// Deserialize `payload` as the entity kind named by `entity_type`.
    pub fn from_payload(entity_type: EntityType, payload: &str) -> Result<Self> {
        if payload.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "empty {entity_type} payload"
            )));
        }

        let snapshot = match entity_type {
            EntityType::User => Self::User(serde_json::from_str(payload)?),
            EntityType::Table => Self::Table(serde_json::from_str(payload)?),
            EntityType::Course => Self::Course(serde_json::from_str(payload)?),
            EntityType::CourseNode => Self::CourseNode(serde_json::from_str(payload)?),
            EntityType::OrdinarySchedule => {
                Self::OrdinarySchedule(serde_json::from_str(payload)?)
            }
            EntityType::TimeSlot => Self::TimeSlot(serde_json::from_str(payload)?),
        };
        Ok(snapshot)
    }
}

/// Key under which a user's version is tracked.
pub fn user_crdt_key(user_id: i64) -> String {
    format!("user:{user_id}")
}
