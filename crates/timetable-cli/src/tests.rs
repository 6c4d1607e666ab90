use std::collections::HashMap;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use timetable_core::config::{RETENTION_DAYS_ENV, SERVER_URL_ENV};
use timetable_core::models::{SyncStatus, Table};

use crate::cli::CompletionShell;
use crate::commands::common::{
    client_config_from_lookup, format_relative_time, format_sync_timestamp, format_table_lines,
    normalize_key, normalize_name, open_database, resolve_table, table_to_list_item,
    DEFAULT_SERVER_URL,
};
use crate::commands::completions::render_completions;
use crate::commands::course::{add_course, list_course_items};
use crate::commands::outbox::list_outbox;
use crate::commands::session::{run_login, run_logout};
use crate::commands::sync::{format_summary_lines, run_sync, SyncSummary};
use crate::commands::table::{add_table, delete_table, list_table_items, rename_table};
use crate::error::CliError;

/// Relay address nothing listens on; local commands never contact it.
const OFFLINE_RELAY: Option<&str> = Some("http://127.0.0.1:9");

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(ToString::to_string).collect()
}

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timetable.db");
    (dir, path)
}

#[test]
fn normalize_name_joins_and_rejects_empty() {
    assert_eq!(normalize_name(&words("  Fall   2024 ")).unwrap(), "Fall 2024");
    assert!(matches!(normalize_name(&[]), Err(CliError::EmptyName)));
    assert!(matches!(normalize_key("  "), Err(CliError::EmptyKey)));
}

#[test]
fn client_config_prefers_flag_then_env_then_default() {
    let env: HashMap<&str, &str> = HashMap::from([
        (SERVER_URL_ENV, "http://env-relay:8080"),
        (RETENTION_DAYS_ENV, "3"),
    ]);
    let lookup = |key: &str| env.get(key).map(|value| (*value).to_string());

    let flagged = client_config_from_lookup(Some("https://flag-relay/"), lookup).unwrap();
    assert_eq!(flagged.server_url, "https://flag-relay");
    assert_eq!(flagged.retention_days, 3);

    let from_env = client_config_from_lookup(None, lookup).unwrap();
    assert_eq!(from_env.server_url, "http://env-relay:8080");

    let fallback = client_config_from_lookup(None, |_| None).unwrap();
    assert_eq!(fallback.server_url, DEFAULT_SERVER_URL);

    let invalid = client_config_from_lookup(Some("relay-without-scheme"), |_| None);
    assert!(matches!(invalid, Err(CliError::Config(_))));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn format_table_lines_mark_default_table() {
    let table = Table::new(1, "Fall2024");
    let other = Table::new(1, "Spring2025");
    let now = table.updated_at;
    let items = vec![
        table_to_list_item(&table, Some(&table.crdt_key), now),
        table_to_list_item(&other, Some(&table.crdt_key), now),
    ];

    let lines = format_table_lines(&items);
    assert!(lines[0].contains("Fall2024 *"));
    assert!(lines[0].contains("20 weeks"));
    assert!(!lines[1].contains('*'));
    assert_eq!(format_table_lines(&[]), vec!["No timetables yet.".to_string()]);
}

#[test]
fn summary_lines_mention_retries_and_warnings() {
    let summary = SyncSummary {
        user_id: 1,
        uploaded: 2,
        upload_failed: 1,
        downloaded: 3,
        applied: 3,
        stale: 0,
        deferred: 1,
        failed: 0,
        cleaned: 0,
        errors: vec!["download COURSE: timeout".to_string()],
    };
    let lines = format_summary_lines(&summary);
    assert_eq!(lines[0], "Sync completed: 2 uploaded, 3 downloaded, 3 applied");
    assert!(lines.iter().any(|line| line.contains("will be retried")));
    assert!(lines.iter().any(|line| line.contains("waiting for their parent")));
    assert!(lines.iter().any(|line| line.starts_with("warning: download COURSE")));
}

#[test]
fn completions_use_binary_name() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("timetable"));
}

#[tokio::test(flavor = "current_thread")]
async fn table_commands_require_login() {
    let (_dir, db_path) = temp_db();

    let result = add_table(&words("Fall2024"), None, None, &db_path, OFFLINE_RELAY).await;
    assert!(matches!(result, Err(CliError::NotSignedIn)));

    let sync = run_sync(false, &db_path, OFFLINE_RELAY).await;
    assert!(matches!(sync, Err(CliError::NotSignedIn)));
}

#[tokio::test(flavor = "current_thread")]
async fn table_lifecycle_queues_outbox_messages() {
    let (_dir, db_path) = temp_db();
    run_login(3, &db_path).await.unwrap();

    let table = add_table(
        &words("Fall2024"),
        Some("2024-09-02".to_string()),
        Some(18),
        &db_path,
        OFFLINE_RELAY,
    )
    .await
    .unwrap();
    assert_eq!(table.total_weeks, 18);

    let prefix = &table.crdt_key[..table.crdt_key.len() - 4];
    let renamed = rename_table(prefix, &words("Fall2024-v2"), &db_path, OFFLINE_RELAY)
        .await
        .unwrap();
    assert_eq!(renamed.crdt_key, table.crdt_key);

    let db = open_database(&db_path).await.unwrap();
    let items = list_table_items(&db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "Fall2024-v2");
    assert_eq!(items[0].start_date.as_deref(), Some("2024-09-02"));
    drop(db);

    delete_table(&table.crdt_key, &db_path, OFFLINE_RELAY)
        .await
        .unwrap();
    let outbox = list_outbox(&db_path).await.unwrap();
    let operations: Vec<&str> = outbox
        .iter()
        .map(|item| item.operation_type.as_str())
        .collect();
    assert_eq!(operations, vec!["CREATE", "UPDATE", "DELETE"]);
    assert!(outbox
        .iter()
        .all(|item| item.status == SyncStatus::Pending.as_str()));

    let db = open_database(&db_path).await.unwrap();
    assert!(list_table_items(&db).await.unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn ambiguous_prefix_is_rejected() {
    let (_dir, db_path) = temp_db();
    run_login(5, &db_path).await.unwrap();

    let first = add_table(&words("A"), None, None, &db_path, OFFLINE_RELAY)
        .await
        .unwrap();
    add_table(&words("B"), None, None, &db_path, OFFLINE_RELAY)
        .await
        .unwrap();

    let db = open_database(&db_path).await.unwrap();
    let result = resolve_table(&first.crdt_key[..1], 5, &db).await;
    assert!(matches!(result, Err(CliError::AmbiguousKey(_))));

    let missing = resolve_table("zzzz", 5, &db).await;
    assert!(matches!(missing, Err(CliError::NotFound { kind: "Table", .. })));

    // Other users' tables are invisible
    let foreign = resolve_table(&first.crdt_key, 6, &db).await;
    assert!(foreign.is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn courses_are_added_to_resolved_table() {
    let (_dir, db_path) = temp_db();
    run_login(2, &db_path).await.unwrap();
    let table = add_table(&words("Fall2024"), None, None, &db_path, OFFLINE_RELAY)
        .await
        .unwrap();

    add_course(
        &table.crdt_key,
        &words("Linear Algebra"),
        Some(" B-204 ".to_string()),
        Some("  ".to_string()),
        &db_path,
        OFFLINE_RELAY,
    )
    .await
    .unwrap();

    let courses = list_course_items(&table.crdt_key, &db_path).await.unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].name, "Linear Algebra");
    assert_eq!(courses[0].room.as_deref(), Some("B-204"));
    assert_eq!(courses[0].teacher, None);
}

#[tokio::test(flavor = "current_thread")]
async fn logout_keeps_local_data() {
    let (_dir, db_path) = temp_db();
    run_login(4, &db_path).await.unwrap();
    add_table(&words("Kept"), None, None, &db_path, OFFLINE_RELAY)
        .await
        .unwrap();

    run_logout(&db_path).await.unwrap();
    assert!(matches!(list_outbox(&db_path).await, Err(CliError::NotSignedIn)));

    run_login(4, &db_path).await.unwrap();
    assert_eq!(list_outbox(&db_path).await.unwrap().len(), 1);
    assert!(run_login(0, &db_path).await.is_err());
}
