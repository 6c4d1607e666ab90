//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute `statements` atomically
async fn run_statements(conn: &Connection, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

/// Migration to version 1: message outbox and local sync state
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Outbox/inbox of sync messages
        "CREATE TABLE IF NOT EXISTS sync_messages (
            id TEXT PRIMARY KEY,
            crdt_key TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            origin_device_id TEXT NOT NULL,
            hlc_wall INTEGER NOT NULL,
            hlc_logical INTEGER NOT NULL,
            hlc_node TEXT NOT NULL,
            payload TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            sync_status TEXT NOT NULL,
            sync_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_messages_status
            ON sync_messages(sync_status, user_id, entity_type)",
        "CREATE INDEX IF NOT EXISTS idx_sync_messages_created ON sync_messages(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_sync_messages_crdt_key ON sync_messages(crdt_key)",
        // Device identity, session, and download watermarks (local only)
        "CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    run_statements(conn, &statements).await?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: schedule entities and the per-key version register
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            default_table_crdt_key TEXT
        )",
        "CREATE TABLE IF NOT EXISTS timetables (
            crdt_key TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT,
            total_weeks INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_timetables_user ON timetables(user_id)",
        "CREATE TABLE IF NOT EXISTS courses (
            crdt_key TEXT PRIMARY KEY,
            table_crdt_key TEXT NOT NULL REFERENCES timetables(crdt_key) ON DELETE CASCADE,
            name TEXT NOT NULL,
            color TEXT,
            room TEXT,
            teacher TEXT,
            credit REAL,
            note TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_courses_table ON courses(table_crdt_key)",
        "CREATE TABLE IF NOT EXISTS course_nodes (
            crdt_key TEXT PRIMARY KEY,
            course_crdt_key TEXT NOT NULL REFERENCES courses(crdt_key) ON DELETE CASCADE,
            day_of_week INTEGER NOT NULL,
            start_node INTEGER NOT NULL,
            step INTEGER NOT NULL,
            start_week INTEGER NOT NULL,
            end_week INTEGER NOT NULL,
            week_type TEXT NOT NULL,
            room TEXT,
            teacher TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_course_nodes_course ON course_nodes(course_crdt_key)",
        "CREATE TABLE IF NOT EXISTS ordinary_schedules (
            crdt_key TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            location TEXT,
            category TEXT,
            color TEXT,
            is_all_day INTEGER NOT NULL DEFAULT 0
        )",
        // Owner may be an ordinary schedule or a course, so the link is checked in code
        "CREATE TABLE IF NOT EXISTS time_slots (
            crdt_key TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            schedule_type TEXT NOT NULL,
            schedule_crdt_key TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            head TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            is_completed INTEGER NOT NULL DEFAULT 0,
            display_color TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_time_slots_owner
            ON time_slots(schedule_type, schedule_crdt_key)",
        "CREATE INDEX IF NOT EXISTS idx_time_slots_start ON time_slots(start_time)",
        "CREATE TRIGGER IF NOT EXISTS time_slots_ordinary_cascade
            AFTER DELETE ON ordinary_schedules
         BEGIN
             DELETE FROM time_slots
             WHERE schedule_type = 'ORDINARY' AND schedule_crdt_key = OLD.crdt_key;
         END",
        "CREATE TRIGGER IF NOT EXISTS time_slots_course_cascade
            AFTER DELETE ON courses
         BEGIN
             DELETE FROM time_slots
             WHERE schedule_type = 'COURSE' AND schedule_crdt_key = OLD.crdt_key;
         END",
        // Last applied timestamp per logical entity; rows outlive message cleanup
        "CREATE TABLE IF NOT EXISTS entity_versions (
            crdt_key TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            hlc_wall INTEGER NOT NULL,
            hlc_node TEXT NOT NULL,
            message_id TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    run_statements(conn, &statements).await?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
