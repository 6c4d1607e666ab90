//! Ordinary schedule and time slot models

use serde::{Deserialize, Serialize};

use super::new_crdt_key;

/// A user schedule item that is not a course (meeting, errand, reminder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdinarySchedule {
    pub crdt_key: String,
    pub user_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
}

impl OrdinarySchedule {
    #[must_use]
    pub fn new(user_id: i64, title: impl Into<String>) -> Self {
        Self {
            crdt_key: new_crdt_key(),
            user_id,
            title: title.into(),
            description: None,
            location: None,
            category: None,
            color: None,
            is_all_day: false,
        }
    }
}

/// What a time slot is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    Ordinary,
    Course,
}

impl ScheduleType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ordinary => "ORDINARY",
            Self::Course => "COURSE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ORDINARY" => Some(Self::Ordinary),
            "COURSE" => Some(Self::Course),
            _ => None,
        }
    }
}

/// A concrete time range on the calendar owned by a schedule or a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub crdt_key: String,
    pub user_id: i64,
    pub schedule_type: ScheduleType,
    /// Owning ordinary schedule or course, according to `schedule_type`
    pub schedule_crdt_key: String,
    /// Start (Unix ms)
    pub start_time: i64,
    /// End (Unix ms)
    pub end_time: i64,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub display_color: Option<String>,
}

impl TimeSlot {
    #[must_use]
    pub fn new(
        user_id: i64,
        schedule_type: ScheduleType,
        schedule_crdt_key: impl Into<String>,
        start_time: i64,
        end_time: i64,
    ) -> Self {
        Self {
            crdt_key: new_crdt_key(),
            user_id,
            schedule_type,
            schedule_crdt_key: schedule_crdt_key.into(),
            start_time,
            end_time,
            head: None,
            priority: 0,
            is_completed: false,
            display_color: None,
        }
    }

    pub const fn duration_millis(&self) -> i64 {
        self.end_time - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_slot_payload_round_trips_schedule_type() {
        let slot = TimeSlot::new(1, ScheduleType::Course, "c1", 1_000, 4_600_000);
        let json = serde_json::to_string(&slot).unwrap();
        assert!(json.contains("\"scheduleType\":\"COURSE\""));
        assert_eq!(slot.duration_millis(), 4_599_000);
    }

    #[test]
    fn schedule_type_parse_rejects_unknown() {
        assert_eq!(ScheduleType::parse("ORDINARY"), Some(ScheduleType::Ordinary));
        assert_eq!(ScheduleType::parse("EXAM"), None);
    }
}
