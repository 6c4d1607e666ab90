use std::path::Path;

use chrono::Utc;
use timetable_core::models::{EntitySnapshot, OperationType, Table};
use timetable_core::SyncDatabase;

use crate::cli::TableCommands;
use crate::commands::common::{
    format_table_lines, normalize_name, open_database, open_engine, require_user, resolve_table,
    table_to_list_item, TableListItem,
};
use crate::error::CliError;

pub async fn run_table(
    command: TableCommands,
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<(), CliError> {
    match command {
        TableCommands::Add {
            name,
            start_date,
            weeks,
        } => {
            let table = add_table(&name, start_date, weeks, db_path, server_url).await?;
            println!("{}", table.crdt_key);
        }
        TableCommands::Rename { key, name } => {
            let table = rename_table(&key, &name, db_path, server_url).await?;
            println!("{}", table.crdt_key);
        }
        TableCommands::Delete { key } => {
            let table = delete_table(&key, db_path, server_url).await?;
            println!("{}", table.crdt_key);
        }
        TableCommands::List { json } => {
            let db = open_database(db_path).await?;
            let items = list_table_items(&db).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_table_lines(&items) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub async fn add_table(
    name: &[String],
    start_date: Option<String>,
    weeks: Option<i32>,
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<Table, CliError> {
    let name = normalize_name(name)?;
    if let Some(weeks) = weeks {
        if !(1..=60).contains(&weeks) {
            return Err(CliError::Config(format!(
                "weeks must be between 1 and 60 (got {weeks})"
            )));
        }
    }

    let engine = open_engine(db_path, server_url).await?;
    let user_id = require_user(engine.db()).await?;
    let mut table = Table::new(user_id, name);
    table.start_date = start_date.and_then(|date| {
        let trimmed = date.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    });
    if let Some(weeks) = weeks {
        table.total_weeks = weeks;
    }

    engine
        .record_change(OperationType::Create, EntitySnapshot::Table(table.clone()))
        .await?;
    Ok(table)
}

pub async fn rename_table(
    key: &str,
    name: &[String],
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<Table, CliError> {
    let name = normalize_name(name)?;
    let engine = open_engine(db_path, server_url).await?;
    let user_id = require_user(engine.db()).await?;
    let mut table = resolve_table(key, user_id, engine.db()).await?;

    table.name = name;
    table.updated_at = Utc::now().timestamp_millis();
    engine
        .record_change(OperationType::Update, EntitySnapshot::Table(table.clone()))
        .await?;
    Ok(table)
}

pub async fn delete_table(
    key: &str,
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<Table, CliError> {
    let engine = open_engine(db_path, server_url).await?;
    let user_id = require_user(engine.db()).await?;
    let table = resolve_table(key, user_id, engine.db()).await?;

    engine
        .record_change(OperationType::Delete, EntitySnapshot::Table(table.clone()))
        .await?;
    Ok(table)
}

pub async fn list_table_items(db: &SyncDatabase) -> Result<Vec<TableListItem>, CliError> {
    let user_id = require_user(db).await?;
    let default_key = db
        .get_user(user_id)
        .await?
        .and_then(|user| user.default_table_crdt_key);
    let now = Utc::now().timestamp_millis();

    Ok(db
        .list_tables(user_id)
        .await?
        .iter()
        .map(|table| table_to_list_item(table, default_key.as_deref(), now))
        .collect())
}
