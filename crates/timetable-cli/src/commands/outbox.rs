use std::path::Path;

use crate::commands::common::{
    format_outbox_lines, message_to_outbox_item, open_database, require_user, OutboxItem,
};
use crate::error::CliError;

pub async fn run_outbox(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let items = list_outbox(db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    for line in format_outbox_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

/// Unsent messages of the signed-in user, oldest first.
pub async fn list_outbox(db_path: &Path) -> Result<Vec<OutboxItem>, CliError> {
    let db = open_database(db_path).await?;
    let user_id = require_user(&db).await?;
    Ok(db
        .query_pending_by_user(user_id)
        .await?
        .iter()
        .map(message_to_outbox_item)
        .collect())
}
