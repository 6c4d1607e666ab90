//! Data models for Timetable

mod course;
mod schedule;
mod snapshot;
mod sync_message;
mod table;

pub use course::{Course, CourseNode, WeekType};
pub use schedule::{OrdinarySchedule, ScheduleType, TimeSlot};
pub use snapshot::{user_crdt_key, EntitySnapshot};
pub use sync_message::{EntityType, OperationType, SyncMessage, SyncStatus};
pub use table::{LocalUser, Table, DEFAULT_TABLE_NAME};

/// Fresh globally unique entity key (UUID v7, time-sortable).
pub fn new_crdt_key() -> String {
    uuid::Uuid::now_v7().to_string()
}
