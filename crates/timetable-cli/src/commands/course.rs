use std::path::Path;

use timetable_core::models::{Course, EntitySnapshot, OperationType};
use timetable_core::util::normalize_text_option;

use crate::cli::CourseCommands;
use crate::commands::common::{
    course_to_list_item, format_course_lines, normalize_name, open_database, open_engine,
    require_user, resolve_table, CourseListItem,
};
use crate::error::CliError;

pub async fn run_course(
    command: CourseCommands,
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<(), CliError> {
    match command {
        CourseCommands::Add {
            table,
            name,
            room,
            teacher,
        } => {
            let course = add_course(&table, &name, room, teacher, db_path, server_url).await?;
            println!("{}", course.crdt_key);
        }
        CourseCommands::List { table, json } => {
            let items = list_course_items(&table, db_path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_course_lines(&items) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub async fn add_course(
    table: &str,
    name: &[String],
    room: Option<String>,
    teacher: Option<String>,
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<Course, CliError> {
    let name = normalize_name(name)?;
    let engine = open_engine(db_path, server_url).await?;
    let user_id = require_user(engine.db()).await?;
    let table = resolve_table(table, user_id, engine.db()).await?;

    let mut course = Course::new(table.crdt_key, name);
    course.room = normalize_text_option(room);
    course.teacher = normalize_text_option(teacher);
    engine
        .record_change(OperationType::Create, EntitySnapshot::Course(course.clone()))
        .await?;
    Ok(course)
}

pub async fn list_course_items(
    table: &str,
    db_path: &Path,
) -> Result<Vec<CourseListItem>, CliError> {
    let db = open_database(db_path).await?;
    let user_id = require_user(&db).await?;
    let table = resolve_table(table, user_id, &db).await?;
    Ok(db
        .list_courses(&table.crdt_key)
        .await?
        .iter()
        .map(course_to_list_item)
        .collect())
}
