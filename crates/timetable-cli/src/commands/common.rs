use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use timetable_core::config::SERVER_URL_ENV;
use timetable_core::models::{Course, SyncMessage, Table};
use timetable_core::{HttpSyncTransport, SyncClientConfig, SyncDatabase, SyncEngine};

use crate::error::CliError;

pub const DB_PATH_ENV: &str = "TIMETABLE_DB_PATH";

/// Relay assumed when neither `--server-url` nor the environment names one.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Serialize)]
pub struct TableListItem {
    pub crdt_key: String,
    pub name: String,
    pub start_date: Option<String>,
    pub total_weeks: i32,
    pub is_default: bool,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct CourseListItem {
    pub crdt_key: String,
    pub name: String,
    pub room: Option<String>,
    pub teacher: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OutboxItem {
    pub id: String,
    pub entity_type: String,
    pub operation_type: String,
    pub crdt_key: String,
    pub hlc: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at_iso: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("timetable")
        .join("timetable.db")
}

pub async fn open_database(path: &Path) -> Result<SyncDatabase, CliError> {
    Ok(SyncDatabase::open_path(path.to_path_buf()).await?)
}

/// Client config with `--server-url` taking precedence over the environment.
pub fn client_config_from_lookup(
    cli_server_url: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SyncClientConfig, CliError> {
    SyncClientConfig::from_lookup(|key| {
        if key == SERVER_URL_ENV {
            cli_server_url
                .map(ToString::to_string)
                .or_else(|| lookup(key))
                .or_else(|| Some(DEFAULT_SERVER_URL.to_string()))
        } else {
            lookup(key)
        }
    })
    .map_err(|error| CliError::Config(error.to_string()))
}

pub async fn open_engine(
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<SyncEngine<HttpSyncTransport>, CliError> {
    let config = client_config_from_lookup(server_url, |key| env::var(key).ok())?;
    let db = open_database(db_path).await?;
    let transport = Arc::new(HttpSyncTransport::new(&config)?);
    Ok(SyncEngine::open(db, transport)
        .await?
        .with_retention_days(config.retention_days)
        .with_upload_batch_size(config.upload_batch_size))
}

pub async fn require_user(db: &SyncDatabase) -> Result<i64, CliError> {
    db.current_user_id().await?.ok_or(CliError::NotSignedIn)
}

pub fn normalize_name(parts: &[String]) -> Result<String, CliError> {
    let joined = parts.join(" ");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyName)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_key(key: &str) -> Result<String, CliError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyKey)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find one of the user's tables by full key or unique key prefix.
pub async fn resolve_table(query: &str, user_id: i64, db: &SyncDatabase) -> Result<Table, CliError> {
    let query = normalize_key(query)?;
    if let Some(table) = db.get_table(&query).await? {
        if table.user_id == user_id {
            return Ok(table);
        }
    }

    let mut matching: Vec<Table> = db
        .list_tables(user_id)
        .await?
        .into_iter()
        .filter(|table| table.crdt_key.starts_with(&query))
        .collect();

    match matching.len() {
        0 => Err(CliError::NotFound {
            kind: "Table",
            query,
        }),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|table| short_key(&table.crdt_key))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousKey(format!(
                "Key prefix '{query}' is ambiguous. Matches include: {options}"
            )))
        }
    }
}

pub fn short_key(key: &str) -> String {
    key.chars().take(13).collect()
}

pub fn table_to_list_item(table: &Table, default_key: Option<&str>, now_ms: i64) -> TableListItem {
    TableListItem {
        crdt_key: table.crdt_key.clone(),
        name: table.name.clone(),
        start_date: table.start_date.clone(),
        total_weeks: table.total_weeks,
        is_default: default_key == Some(table.crdt_key.as_str()),
        updated_at: table.updated_at,
        relative_time: format_relative_time(table.updated_at, now_ms),
    }
}

pub fn format_table_lines(items: &[TableListItem]) -> Vec<String> {
    if items.is_empty() {
        return vec!["No timetables yet.".to_string()];
    }
    items
        .iter()
        .map(|item| {
            let marker = if item.is_default { " *" } else { "" };
            format!(
                "{}  {}{marker}  ({} weeks, {})",
                short_key(&item.crdt_key),
                item.name,
                item.total_weeks,
                item.relative_time
            )
        })
        .collect()
}

pub fn course_to_list_item(course: &Course) -> CourseListItem {
    CourseListItem {
        crdt_key: course.crdt_key.clone(),
        name: course.name.clone(),
        room: course.room.clone(),
        teacher: course.teacher.clone(),
    }
}

pub fn format_course_lines(items: &[CourseListItem]) -> Vec<String> {
    if items.is_empty() {
        return vec!["No courses in this timetable.".to_string()];
    }
    items
        .iter()
        .map(|item| {
            let details = [item.room.as_deref(), item.teacher.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ");
            if details.is_empty() {
                format!("{}  {}", short_key(&item.crdt_key), item.name)
            } else {
                format!("{}  {}  [{details}]", short_key(&item.crdt_key), item.name)
            }
        })
        .collect()
}

pub fn message_to_outbox_item(message: &SyncMessage) -> OutboxItem {
    OutboxItem {
        id: message.id.clone(),
        entity_type: message.entity_type.as_str().to_string(),
        operation_type: message.operation_type.as_str().to_string(),
        crdt_key: message.crdt_key.clone(),
        hlc: message.hlc_timestamp.to_string(),
        status: message.sync_status.as_str().to_string(),
        error: message.sync_error.clone(),
        created_at_iso: format_sync_timestamp(message.created_at),
    }
}

pub fn format_outbox_lines(items: &[OutboxItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{}  {:<8} {:<17} {} {}",
                item.created_at_iso,
                item.status,
                item.entity_type,
                item.operation_type,
                short_key(&item.crdt_key)
            );
            if let Some(error) = &item.error {
                line.push_str("  ");
                line.push_str(error);
            }
            line
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
