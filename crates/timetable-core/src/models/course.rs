//! Course and course node models

use serde::{Deserialize, Serialize};

use super::new_crdt_key;

/// A course belonging to a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub crdt_key: String,
    /// Parent table
    pub table_crdt_key: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub teacher: Option<String>,
    #[serde(default)]
    pub credit: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Course {
    #[must_use]
    pub fn new(table_crdt_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            crdt_key: new_crdt_key(),
            table_crdt_key: table_crdt_key.into(),
            name: name.into(),
            color: None,
            room: None,
            teacher: None,
            credit: None,
            note: None,
        }
    }
}

/// Which weeks of the term a course node repeats in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeekType {
    #[default]
    All,
    Odd,
    Even,
}

impl WeekType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Odd => "ODD",
            Self::Even => "EVEN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "ODD" => Self::Odd,
            "EVEN" => Self::Even,
            _ => Self::All,
        }
    }

    /// Whether the node takes place in `week` (1-based).
    pub const fn includes(self, week: i32) -> bool {
        match self {
            Self::All => true,
            Self::Odd => week % 2 == 1,
            Self::Even => week % 2 == 0,
        }
    }
}

/// One weekly occurrence pattern of a course on the calendar grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseNode {
    pub crdt_key: String,
    /// Parent course
    pub course_crdt_key: String,
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: i32,
    /// First period of the day occupied
    pub start_node: i32,
    /// Number of consecutive periods
    #[serde(default = "default_step")]
    pub step: i32,
    pub start_week: i32,
    pub end_week: i32,
    #[serde(default)]
    pub week_type: WeekType,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub teacher: Option<String>,
}

const fn default_step() -> i32 {
    1
}

impl CourseNode {
    #[must_use]
    pub fn new(course_crdt_key: impl Into<String>, day_of_week: i32, start_node: i32) -> Self {
        Self {
            crdt_key: new_crdt_key(),
            course_crdt_key: course_crdt_key.into(),
            day_of_week,
            start_node,
            step: default_step(),
            start_week: 1,
            end_week: 20,
            week_type: WeekType::All,
            room: None,
            teacher: None,
        }
    }

    /// Whether the node is scheduled in `week`.
    pub const fn occurs_in_week(&self, week: i32) -> bool {
        week >= self.start_week && week <= self.end_week && self.week_type.includes(week)
    }
}
