//! Timetable ("table") and local user models

use serde::{Deserialize, Serialize};

use super::new_crdt_key;

/// Name reserved for the table that becomes the user's default when it arrives.
pub const DEFAULT_TABLE_NAME: &str = "Default Table";

/// A timetable: the root container for courses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub crdt_key: String,
    pub user_id: i64,
    pub name: String,
    /// First day of the term (YYYY-MM-DD)
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default = "default_total_weeks")]
    pub total_weeks: i32,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

const fn default_total_weeks() -> i32 {
    20
}

impl Table {
    #[must_use]
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            crdt_key: new_crdt_key(),
            user_id,
            name: name.into(),
            start_date: None,
            total_weeks: default_total_weeks(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this table carries the reserved default-table name.
    pub fn is_default_sentinel(&self) -> bool {
        self.name == DEFAULT_TABLE_NAME
    }
}

/// Locally known account, holder of the default-table pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub default_table_crdt_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_new_has_fresh_key() {
        let first = Table::new(1, "Fall2024");
        let second = Table::new(1, "Fall2024");
        assert_ne!(first.crdt_key, second.crdt_key);
        assert_eq!(first.total_weeks, 20);
        assert!(!first.is_default_sentinel());
    }

    #[test]
    fn table_payload_uses_camel_case() {
        let table = Table::new(3, DEFAULT_TABLE_NAME);
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["userId"], 3);
        assert_eq!(json["totalWeeks"], 20);
        assert!(table.is_default_sentinel());
    }

    #[test]
    fn table_payload_tolerates_missing_optional_fields() {
        let table: Table = serde_json::from_str(
            r#"{"crdtKey":"t1","userId":1,"name":"Fall2024","createdAt":1,"updatedAt":2}"#,
        )
        .unwrap();
        assert_eq!(table.start_date, None);
        assert_eq!(table.total_weeks, 20);
    }
}
