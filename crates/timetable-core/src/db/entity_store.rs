//! Entity store: local schedule state plus the per-key version register.

use libsql::params::Params;
use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{
    Course, CourseNode, EntitySnapshot, EntityType, LocalUser, OrdinarySchedule, ScheduleType,
    SyncMessage, Table, TimeSlot, WeekType,
};

use super::values::{flag, optional_real, optional_text, read_flag, real_or_null, text_or_null};

/// Last applied write of one logical entity.
///
/// The logical HLC counter is not kept: peers never see it, so ranking on it
/// here would let the writer and its peers disagree about the newest write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityVersion {
    pub entity_type: EntityType,
    pub wall_clock: i64,
    pub node_id: String,
    pub message_id: String,
    /// Tombstone: the latest applied operation was a DELETE
    pub is_deleted: bool,
}

impl EntityVersion {
    pub fn rank(&self) -> (i64, &str, &str) {
        (self.wall_clock, self.node_id.as_str(), self.message_id.as_str())
    }

    /// Whether `message` is this write or older than it.
    pub fn covers(&self, message: &SyncMessage) -> bool {
        self.rank() >= message.version_rank()
    }
}

/// Trait for entity storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityStore {
    /// Version register entry for `crdt_key`
    async fn version(&self, crdt_key: &str) -> Result<Option<EntityVersion>>;

    /// Make `message` the latest applied write of its key
    async fn record_version(&self, message: &SyncMessage, is_deleted: bool) -> Result<()>;

    /// Parent that must exist before `snapshot` can be stored, if it is absent
    async fn missing_parent(&self, snapshot: &EntitySnapshot) -> Result<Option<(EntityType, String)>>;

    /// Insert or update the entity in its owning table
    async fn upsert(&self, snapshot: &EntitySnapshot) -> Result<()>;

    /// Remove an entity; returns whether a row existed
    async fn delete(&self, entity_type: EntityType, crdt_key: &str) -> Result<bool>;

    /// Point the user's default table at `table_crdt_key`; returns whether it changed
    async fn set_default_table(&self, user_id: i64, table_crdt_key: &str) -> Result<bool>;

    async fn get_user(&self, user_id: i64) -> Result<Option<LocalUser>>;

    async fn get_table(&self, crdt_key: &str) -> Result<Option<Table>>;

    /// Tables of a user, ordered by name
    async fn list_tables(&self, user_id: i64) -> Result<Vec<Table>>;

    async fn get_course(&self, crdt_key: &str) -> Result<Option<Course>>;

    async fn list_courses(&self, table_crdt_key: &str) -> Result<Vec<Course>>;

    async fn get_course_node(&self, crdt_key: &str) -> Result<Option<CourseNode>>;

    async fn list_course_nodes(&self, course_crdt_key: &str) -> Result<Vec<CourseNode>>;

    async fn get_ordinary_schedule(&self, crdt_key: &str) -> Result<Option<OrdinarySchedule>>;

    async fn get_time_slot(&self, crdt_key: &str) -> Result<Option<TimeSlot>>;

    /// Time slots of a user, ordered by start time
    async fn list_time_slots(&self, user_id: i64) -> Result<Vec<TimeSlot>>;
}

/// libSQL implementation of `EntityStore`
pub struct LibSqlEntityStore<'a> {
    conn: &'a Connection,
}

const TABLE_COLUMNS: &str = "crdt_key, user_id, name, start_date, total_weeks, created_at, updated_at";
const COURSE_COLUMNS: &str = "crdt_key, table_crdt_key, name, color, room, teacher, credit, note";
const COURSE_NODE_COLUMNS: &str = "crdt_key, course_crdt_key, day_of_week, start_node, step,
     start_week, end_week, week_type, room, teacher";
const SCHEDULE_COLUMNS: &str =
    "crdt_key, user_id, title, description, location, category, color, is_all_day";
const TIME_SLOT_COLUMNS: &str = "crdt_key, user_id, schedule_type, schedule_crdt_key,
     start_time, end_time, head, priority, is_completed, display_color";

impl<'a> LibSqlEntityStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn exists(&self, table: &str, crdt_key: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE crdt_key = ?)");
        let mut rows = self.conn.query(&sql, [crdt_key]).await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn query_all<T>(
        &self,
        sql: &str,
        params: Vec<Value>,
        parse: fn(&Row) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut rows = self.conn.query(sql, Params::Positional(params)).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(parse(&row)?);
        }
        Ok(items)
    }

    async fn query_one<T>(
        &self,
        sql: &str,
        crdt_key: &str,
        parse: fn(&Row) -> Result<T>,
    ) -> Result<Option<T>> {
        let mut items = self
            .query_all(sql, vec![Value::Text(crdt_key.to_string())], parse)
            .await?;
        Ok(items.pop())
    }

    async fn ensure_user(&self, user_id: i64) -> Result<()> {
        self.conn
            .execute("INSERT OR IGNORE INTO users (user_id) VALUES (?)", [user_id])
            .await?;
        Ok(())
    }

    async fn upsert_user(&self, user: &LocalUser) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (user_id, username, default_table_crdt_key) VALUES (?, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET
                    username = excluded.username,
                    default_table_crdt_key = excluded.default_table_crdt_key",
                Params::Positional(vec![
                    Value::Integer(user.user_id),
                    text_or_null(user.username.as_deref()),
                    text_or_null(user.default_table_crdt_key.as_deref()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn upsert_table(&self, table: &Table) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO timetables (crdt_key, user_id, name, start_date, total_weeks, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(crdt_key) DO UPDATE SET
                    user_id = excluded.user_id,
                    name = excluded.name,
                    start_date = excluded.start_date,
                    total_weeks = excluded.total_weeks,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                Params::Positional(vec![
                    Value::Text(table.crdt_key.clone()),
                    Value::Integer(table.user_id),
                    Value::Text(table.name.clone()),
                    text_or_null(table.start_date.as_deref()),
                    Value::Integer(i64::from(table.total_weeks)),
                    Value::Integer(table.created_at),
                    Value::Integer(table.updated_at),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn upsert_course(&self, course: &Course) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO courses (crdt_key, table_crdt_key, name, color, room, teacher, credit, note)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(crdt_key) DO UPDATE SET
                    table_crdt_key = excluded.table_crdt_key,
                    name = excluded.name,
                    color = excluded.color,
                    room = excluded.room,
                    teacher = excluded.teacher,
                    credit = excluded.credit,
                    note = excluded.note",
                Params::Positional(vec![
                    Value::Text(course.crdt_key.clone()),
                    Value::Text(course.table_crdt_key.clone()),
                    Value::Text(course.name.clone()),
                    text_or_null(course.color.as_deref()),
                    text_or_null(course.room.as_deref()),
                    text_or_null(course.teacher.as_deref()),
                    real_or_null(course.credit),
                    text_or_null(course.note.as_deref()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn upsert_course_node(&self, node: &CourseNode) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO course_nodes (crdt_key, course_crdt_key, day_of_week, start_node, step,
                    start_week, end_week, week_type, room, teacher)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(crdt_key) DO UPDATE SET
                    course_crdt_key = excluded.course_crdt_key,
                    day_of_week = excluded.day_of_week,
                    start_node = excluded.start_node,
                    step = excluded.step,
                    start_week = excluded.start_week,
                    end_week = excluded.end_week,
                    week_type = excluded.week_type,
                    room = excluded.room,
                    teacher = excluded.teacher",
                Params::Positional(vec![
                    Value::Text(node.crdt_key.clone()),
                    Value::Text(node.course_crdt_key.clone()),
                    Value::Integer(i64::from(node.day_of_week)),
                    Value::Integer(i64::from(node.start_node)),
                    Value::Integer(i64::from(node.step)),
                    Value::Integer(i64::from(node.start_week)),
                    Value::Integer(i64::from(node.end_week)),
                    Value::Text(node.week_type.as_str().to_string()),
                    text_or_null(node.room.as_deref()),
                    text_or_null(node.teacher.as_deref()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn upsert_ordinary_schedule(&self, schedule: &OrdinarySchedule) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO ordinary_schedules (crdt_key, user_id, title, description, location,
                    category, color, is_all_day)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(crdt_key) DO UPDATE SET
                    user_id = excluded.user_id,
                    title = excluded.title,
                    description = excluded.description,
                    location = excluded.location,
                    category = excluded.category,
                    color = excluded.color,
                    is_all_day = excluded.is_all_day",
                Params::Positional(vec![
                    Value::Text(schedule.crdt_key.clone()),
                    Value::Integer(schedule.user_id),
                    Value::Text(schedule.title.clone()),
                    text_or_null(schedule.description.as_deref()),
                    text_or_null(schedule.location.as_deref()),
                    text_or_null(schedule.category.as_deref()),
                    text_or_null(schedule.color.as_deref()),
                    flag(schedule.is_all_day),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn upsert_time_slot(&self, slot: &TimeSlot) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO time_slots (crdt_key, user_id, schedule_type, schedule_crdt_key,
                    start_time, end_time, head, priority, is_completed, display_color)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(crdt_key) DO UPDATE SET
                    user_id = excluded.user_id,
                    schedule_type = excluded.schedule_type,
                    schedule_crdt_key = excluded.schedule_crdt_key,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    head = excluded.head,
                    priority = excluded.priority,
                    is_completed = excluded.is_completed,
                    display_color = excluded.display_color",
                Params::Positional(vec![
                    Value::Text(slot.crdt_key.clone()),
                    Value::Integer(slot.user_id),
                    Value::Text(slot.schedule_type.as_str().to_string()),
                    Value::Text(slot.schedule_crdt_key.clone()),
                    Value::Integer(slot.start_time),
                    Value::Integer(slot.end_time),
                    text_or_null(slot.head.as_deref()),
                    Value::Integer(i64::from(slot.priority)),
                    flag(slot.is_completed),
                    text_or_null(slot.display_color.as_deref()),
                ]),
            )
            .await?;
        Ok(())
    }

    fn parse_user(row: &Row) -> Result<LocalUser> {
        Ok(LocalUser {
            user_id: row.get(0)?,
            username: optional_text(row, 1)?,
            default_table_crdt_key: optional_text(row, 2)?,
        })
    }

    fn parse_table(row: &Row) -> Result<Table> {
        Ok(Table {
            crdt_key: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            start_date: optional_text(row, 3)?,
            total_weeks: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn parse_course(row: &Row) -> Result<Course> {
        Ok(Course {
            crdt_key: row.get(0)?,
            table_crdt_key: row.get(1)?,
            name: row.get(2)?,
            color: optional_text(row, 3)?,
            room: optional_text(row, 4)?,
            teacher: optional_text(row, 5)?,
            credit: optional_real(row, 6)?,
            note: optional_text(row, 7)?,
        })
    }

    fn parse_course_node(row: &Row) -> Result<CourseNode> {
        Ok(CourseNode {
            crdt_key: row.get(0)?,
            course_crdt_key: row.get(1)?,
            day_of_week: row.get(2)?,
            start_node: row.get(3)?,
            step: row.get(4)?,
            start_week: row.get(5)?,
            end_week: row.get(6)?,
            week_type: WeekType::parse(&row.get::<String>(7)?),
            room: optional_text(row, 8)?,
            teacher: optional_text(row, 9)?,
        })
    }

    fn parse_ordinary_schedule(row: &Row) -> Result<OrdinarySchedule> {
        Ok(OrdinarySchedule {
            crdt_key: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: optional_text(row, 3)?,
            location: optional_text(row, 4)?,
            category: optional_text(row, 5)?,
            color: optional_text(row, 6)?,
            is_all_day: read_flag(row, 7)?,
        })
    }

    fn parse_time_slot(row: &Row) -> Result<TimeSlot> {
        let schedule_type: String = row.get(2)?;
        Ok(TimeSlot {
            crdt_key: row.get(0)?,
            user_id: row.get(1)?,
            schedule_type: ScheduleType::parse(&schedule_type).ok_or_else(|| {
                Error::Database(format!("unknown schedule_type '{schedule_type}'"))
            })?,
            schedule_crdt_key: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            head: optional_text(row, 6)?,
            priority: row.get(7)?,
            is_completed: read_flag(row, 8)?,
            display_color: optional_text(row, 9)?,
        })
    }
}

/// Storage table owning an entity type
const fn table_for(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::User => "users",
        EntityType::Table => "timetables",
        EntityType::Course => "courses",
        EntityType::CourseNode => "course_nodes",
        EntityType::OrdinarySchedule => "ordinary_schedules",
        EntityType::TimeSlot => "time_slots",
    }
}

impl EntityStore for LibSqlEntityStore<'_> {
    async fn version(&self, crdt_key: &str) -> Result<Option<EntityVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, hlc_wall, hlc_node, message_id, is_deleted
                 FROM entity_versions WHERE crdt_key = ?",
                [crdt_key],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let entity_type: String = row.get(0)?;
        Ok(Some(EntityVersion {
            entity_type: entity_type.parse()?,
            wall_clock: row.get(1)?,
            node_id: row.get(2)?,
            message_id: row.get(3)?,
            is_deleted: read_flag(&row, 4)?,
        }))
    }

    async fn record_version(&self, message: &SyncMessage, is_deleted: bool) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO entity_versions (crdt_key, entity_type, hlc_wall, hlc_node, message_id, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(crdt_key) DO UPDATE SET
                    entity_type = excluded.entity_type,
                    hlc_wall = excluded.hlc_wall,
                    hlc_node = excluded.hlc_node,
                    message_id = excluded.message_id,
                    is_deleted = excluded.is_deleted",
                Params::Positional(vec![
                    Value::Text(message.crdt_key.clone()),
                    Value::Text(message.entity_type.as_str().to_string()),
                    Value::Integer(message.hlc_timestamp.wall_clock),
                    Value::Text(message.hlc_timestamp.node_id.clone()),
                    Value::Text(message.id.clone()),
                    flag(is_deleted),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn missing_parent(&self, snapshot: &EntitySnapshot) -> Result<Option<(EntityType, String)>> {
        let (parent_type, parent_key) = match snapshot {
            EntitySnapshot::User(_)
            | EntitySnapshot::Table(_)
            | EntitySnapshot::OrdinarySchedule(_) => return Ok(None),
            EntitySnapshot::Course(course) => (EntityType::Table, &course.table_crdt_key),
            EntitySnapshot::CourseNode(node) => (EntityType::Course, &node.course_crdt_key),
            EntitySnapshot::TimeSlot(slot) => match slot.schedule_type {
                ScheduleType::Ordinary => (EntityType::OrdinarySchedule, &slot.schedule_crdt_key),
                ScheduleType::Course => (EntityType::Course, &slot.schedule_crdt_key),
            },
        };

        if self.exists(table_for(parent_type), parent_key).await? {
            Ok(None)
        } else {
            Ok(Some((parent_type, parent_key.clone())))
        }
    }

    async fn upsert(&self, snapshot: &EntitySnapshot) -> Result<()> {
        match snapshot {
            EntitySnapshot::User(user) => self.upsert_user(user).await,
            EntitySnapshot::Table(table) => self.upsert_table(table).await,
            EntitySnapshot::Course(course) => self.upsert_course(course).await,
            EntitySnapshot::CourseNode(node) => self.upsert_course_node(node).await,
            EntitySnapshot::OrdinarySchedule(schedule) => {
                self.upsert_ordinary_schedule(schedule).await
            }
            EntitySnapshot::TimeSlot(slot) => self.upsert_time_slot(slot).await,
        }
    }

    async fn delete(&self, entity_type: EntityType, crdt_key: &str) -> Result<bool> {
        let deleted = if entity_type == EntityType::User {
            let user_id = crdt_key
                .strip_prefix("user:")
                .and_then(|id| id.parse::<i64>().ok())
                .ok_or_else(|| Error::InvalidInput(format!("invalid user key '{crdt_key}'")))?;
            self.conn
                .execute("DELETE FROM users WHERE user_id = ?", [user_id])
                .await?
        } else {
            let sql = format!("DELETE FROM {} WHERE crdt_key = ?", table_for(entity_type));
            self.conn.execute(&sql, [crdt_key]).await?
        };
        Ok(deleted > 0)
    }

    async fn set_default_table(&self, user_id: i64, table_crdt_key: &str) -> Result<bool> {
        self.ensure_user(user_id).await?;
        let changed = self
            .conn
            .execute(
                "UPDATE users SET default_table_crdt_key = ?
                 WHERE user_id = ? AND default_table_crdt_key IS NOT ?",
                Params::Positional(vec![
                    Value::Text(table_crdt_key.to_string()),
                    Value::Integer(user_id),
                    Value::Text(table_crdt_key.to_string()),
                ]),
            )
            .await?;
        Ok(changed > 0)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<LocalUser>> {
        let mut items = self
            .query_all(
                "SELECT user_id, username, default_table_crdt_key FROM users WHERE user_id = ?",
                vec![Value::Integer(user_id)],
                Self::parse_user,
            )
            .await?;
        Ok(items.pop())
    }

    async fn get_table(&self, crdt_key: &str) -> Result<Option<Table>> {
        let sql = format!("SELECT {TABLE_COLUMNS} FROM timetables WHERE crdt_key = ?");
        self.query_one(&sql, crdt_key, Self::parse_table).await
    }

    async fn list_tables(&self, user_id: i64) -> Result<Vec<Table>> {
        let sql = format!(
            "SELECT {TABLE_COLUMNS} FROM timetables WHERE user_id = ? ORDER BY name ASC"
        );
        self.query_all(&sql, vec![Value::Integer(user_id)], Self::parse_table)
            .await
    }

    async fn get_course(&self, crdt_key: &str) -> Result<Option<Course>> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE crdt_key = ?");
        self.query_one(&sql, crdt_key, Self::parse_course).await
    }

    async fn list_courses(&self, table_crdt_key: &str) -> Result<Vec<Course>> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE table_crdt_key = ? ORDER BY name ASC"
        );
        self.query_all(
            &sql,
            vec![Value::Text(table_crdt_key.to_string())],
            Self::parse_course,
        )
        .await
    }

    async fn get_course_node(&self, crdt_key: &str) -> Result<Option<CourseNode>> {
        let sql = format!("SELECT {COURSE_NODE_COLUMNS} FROM course_nodes WHERE crdt_key = ?");
        self.query_one(&sql, crdt_key, Self::parse_course_node).await
    }

    async fn list_course_nodes(&self, course_crdt_key: &str) -> Result<Vec<CourseNode>> {
        let sql = format!(
            "SELECT {COURSE_NODE_COLUMNS} FROM course_nodes WHERE course_crdt_key = ?
             ORDER BY day_of_week ASC, start_node ASC"
        );
        self.query_all(
            &sql,
            vec![Value::Text(course_crdt_key.to_string())],
            Self::parse_course_node,
        )
        .await
    }

    async fn get_ordinary_schedule(&self, crdt_key: &str) -> Result<Option<OrdinarySchedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM ordinary_schedules WHERE crdt_key = ?");
        self.query_one(&sql, crdt_key, Self::parse_ordinary_schedule)
            .await
    }

    async fn get_time_slot(&self, crdt_key: &str) -> Result<Option<TimeSlot>> {
        let sql = format!("SELECT {TIME_SLOT_COLUMNS} FROM time_slots WHERE crdt_key = ?");
        self.query_one(&sql, crdt_key, Self::parse_time_slot).await
    }

    async fn list_time_slots(&self, user_id: i64) -> Result<Vec<TimeSlot>> {
        let sql = format!(
            "SELECT {TIME_SLOT_COLUMNS} FROM time_slots WHERE user_id = ? ORDER BY start_time ASC"
        );
        self.query_all(&sql, vec![Value::Integer(user_id)], Self::parse_time_slot)
            .await
    }
}
