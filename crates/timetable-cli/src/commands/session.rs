use std::path::Path;

use crate::commands::common::open_database;
use crate::error::CliError;

pub async fn run_login(user_id: i64, db_path: &Path) -> Result<(), CliError> {
    if user_id <= 0 {
        return Err(CliError::Config(format!("invalid user id {user_id}")));
    }
    let db = open_database(db_path).await?;
    db.set_current_user_id(Some(user_id)).await?;
    println!("Signed in as user {user_id}");
    Ok(())
}

pub async fn run_logout(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    db.set_current_user_id(None).await?;
    println!("Signed out");
    Ok(())
}

pub async fn run_device(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let device_id = db.device_id().await?;
    let user = db
        .current_user_id()
        .await?
        .map_or_else(|| "(signed out)".to_string(), |id| id.to_string());

    println!("Device:   {device_id}");
    println!("User:     {user}");
    println!("Database: {}", db_path.display());
    for (status, count) in db.count_by_status().await? {
        println!("{:<9} {count}", format!("{status}:"));
    }
    Ok(())
}
