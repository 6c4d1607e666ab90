//! Outbox repository: durable queue of sync messages and their status.

use libsql::params::Params;
use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{EntityType, SyncMessage, SyncStatus};
use crate::sync::HlcTimestamp;

use super::connection::in_transaction;
use super::values::{optional_text, placeholders, text_or_null};

/// SQLite caps bound parameters per statement; id lists are chunked below it.
const ID_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = "id, crdt_key, entity_type, operation_type, origin_device_id,
     hlc_wall, hlc_logical, hlc_node, payload, user_id, sync_status, sync_error, created_at";

/// Statuses the uploader picks up; failed rows are retried on the next cycle.
const UPLOADABLE: &str = "sync_status IN ('PENDING', 'FAILED')";

/// Trait for outbox storage operations (async)
#[allow(async_fn_in_trait)]
pub trait OutboxRepository {
    /// Durably insert one message
    async fn append(&self, message: &SyncMessage) -> Result<()>;

    /// Durably insert several messages; all or none are stored
    async fn append_batch(&self, messages: &[SyncMessage]) -> Result<()>;

    /// Insert a message received from the relay unless its id is already known
    async fn insert_remote(&self, message: &SyncMessage) -> Result<bool>;

    /// Messages waiting for upload
    async fn query_pending(&self) -> Result<Vec<SyncMessage>>;

    /// Messages waiting for upload, for one user
    async fn query_pending_by_user(&self, user_id: i64) -> Result<Vec<SyncMessage>>;

    /// Messages waiting for upload, for one entity type
    async fn query_pending_by_type(&self, entity_type: EntityType) -> Result<Vec<SyncMessage>>;

    /// Messages waiting for upload, for one user and entity type
    async fn query_pending_for(
        &self,
        user_id: i64,
        entity_type: EntityType,
    ) -> Result<Vec<SyncMessage>>;

    /// Downloaded messages not yet applied locally (SYNCED, from other devices)
    async fn query_unapplied(&self, local_device_id: &str) -> Result<Vec<SyncMessage>>;

    /// Get a message by id
    async fn get(&self, id: &str) -> Result<Option<SyncMessage>>;

    /// Mark uploaded messages as acknowledged by the relay
    async fn mark_synced(&self, ids: &[String]) -> Result<u64>;

    /// Mark messages whose upload failed, keeping them for a later attempt
    async fn mark_failed(&self, ids: &[String], reason: &str) -> Result<u64>;

    /// Mark received messages as applied to local state
    async fn mark_processed(&self, ids: &[String]) -> Result<u64>;

    /// Delete SYNCED/PROCESSED messages created before `older_than` (Unix ms)
    async fn cleanup(&self, older_than: i64) -> Result<u64>;

    /// Number of messages per status
    async fn count_by_status(&self) -> Result<Vec<(SyncStatus, u64)>>;

    /// Greatest timestamp this node has stamped on a message
    async fn latest_timestamp_for_node(&self, node_id: &str) -> Result<Option<HlcTimestamp>>;
}

/// libSQL implementation of `OutboxRepository`
pub struct LibSqlOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn insert(&self, message: &SyncMessage, or_ignore: bool) -> Result<u64> {
        let verb = if or_ignore {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let sql = format!(
            "{verb} INTO sync_messages (
                id, crdt_key, entity_type, operation_type, origin_device_id,
                hlc_wall, hlc_logical, hlc_node, payload, user_id,
                sync_status, sync_error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let now = chrono::Utc::now().timestamp_millis();

        let params = vec![
            Value::Text(message.id.clone()),
            Value::Text(message.crdt_key.clone()),
            Value::Text(message.entity_type.as_str().to_string()),
            Value::Text(message.operation_type.as_str().to_string()),
            Value::Text(message.origin_device_id.clone()),
            Value::Integer(message.hlc_timestamp.wall_clock),
            Value::Integer(i64::from(message.hlc_timestamp.logical)),
            Value::Text(message.hlc_timestamp.node_id.clone()),
            Value::Text(message.payload.clone()),
            Value::Integer(message.user_id),
            Value::Text(message.sync_status.as_str().to_string()),
            text_or_null(message.sync_error.as_deref()),
            Value::Integer(message.created_at),
            Value::Integer(now),
        ];

        Ok(self.conn.execute(&sql, Params::Positional(params)).await?)
    }

    async fn select(&self, filter: &str, params: Vec<Value>) -> Result<Vec<SyncMessage>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_messages WHERE {filter}
             ORDER BY hlc_wall ASC, hlc_logical ASC, hlc_node ASC"
        );
        let mut rows = self.conn.query(&sql, Params::Positional(params)).await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::parse_message(&row)?);
        }
        Ok(messages)
    }

    /// Update status for `ids` whose current status matches `from_filter`
    async fn transition(
        &self,
        ids: &[String],
        to: SyncStatus,
        reason: Option<&str>,
        from_filter: &str,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.conn;
        in_transaction(conn, || async move {
            let mut updated = 0;
            for chunk in ids.chunks(ID_CHUNK) {
                let sql = format!(
                    "UPDATE sync_messages SET sync_status = ?, sync_error = ?, updated_at = ?
                     WHERE {from_filter} AND id IN ({})",
                    placeholders(chunk.len())
                );
                let mut params = vec![
                    Value::Text(to.as_str().to_string()),
                    text_or_null(reason),
                    Value::Integer(now),
                ];
                params.extend(chunk.iter().map(|id| Value::Text(id.clone())));
                updated += conn.execute(&sql, Params::Positional(params)).await?;
            }
            Ok(updated)
        })
        .await
    }

    /// Parse a message from a database row
    fn parse_message(row: &Row) -> Result<SyncMessage> {
        let entity_type: String = row.get(2)?;
        let operation_type: String = row.get(3)?;
        let sync_status: String = row.get(10)?;
        let logical = i32::try_from(row.get::<i64>(6)?)
            .map_err(|_| Error::Database("hlc_logical out of range".into()))?;

        Ok(SyncMessage {
            id: row.get(0)?,
            crdt_key: row.get(1)?,
            entity_type: entity_type.parse()?,
            operation_type: operation_type.parse()?,
            origin_device_id: row.get(4)?,
            hlc_timestamp: HlcTimestamp::new(row.get::<i64>(5)?, logical, row.get::<String>(7)?),
            payload: row.get(8)?,
            user_id: row.get(9)?,
            sync_status: sync_status.parse()?,
            sync_error: optional_text(row, 11)?,
            created_at: row.get(12)?,
        })
    }
}

impl OutboxRepository for LibSqlOutboxRepository<'_> {
    async fn append(&self, message: &SyncMessage) -> Result<()> {
        self.insert(message, false).await?;
        Ok(())
    }

    async fn append_batch(&self, messages: &[SyncMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        in_transaction(self.conn, || async {
            for message in messages {
                self.insert(message, false).await?;
            }
            Ok(())
        })
        .await
    }

    async fn insert_remote(&self, message: &SyncMessage) -> Result<bool> {
        Ok(self.insert(message, true).await? > 0)
    }

    async fn query_pending(&self) -> Result<Vec<SyncMessage>> {
        self.select(UPLOADABLE, Vec::new()).await
    }

    async fn query_pending_by_user(&self, user_id: i64) -> Result<Vec<SyncMessage>> {
        self.select(
            &format!("{UPLOADABLE} AND user_id = ?"),
            vec![Value::Integer(user_id)],
        )
        .await
    }

    async fn query_pending_by_type(&self, entity_type: EntityType) -> Result<Vec<SyncMessage>> {
        self.select(
            &format!("{UPLOADABLE} AND entity_type = ?"),
            vec![Value::Text(entity_type.as_str().to_string())],
        )
        .await
    }

    async fn query_pending_for(
        &self,
        user_id: i64,
        entity_type: EntityType,
    ) -> Result<Vec<SyncMessage>> {
        self.select(
            &format!("{UPLOADABLE} AND user_id = ? AND entity_type = ?"),
            vec![
                Value::Integer(user_id),
                Value::Text(entity_type.as_str().to_string()),
            ],
        )
        .await
    }

    async fn query_unapplied(&self, local_device_id: &str) -> Result<Vec<SyncMessage>> {
        self.select(
            "sync_status = 'SYNCED' AND origin_device_id != ?",
            vec![Value::Text(local_device_id.to_string())],
        )
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<SyncMessage>> {
        let mut messages = self
            .select("id = ?", vec![Value::Text(id.to_string())])
            .await?;
        Ok(messages.pop())
    }

    async fn mark_synced(&self, ids: &[String]) -> Result<u64> {
        self.transition(ids, SyncStatus::Synced, None, UPLOADABLE)
            .await
    }

    async fn mark_failed(&self, ids: &[String], reason: &str) -> Result<u64> {
        self.transition(ids, SyncStatus::Failed, Some(reason), UPLOADABLE)
            .await
    }

    async fn mark_processed(&self, ids: &[String]) -> Result<u64> {
        self.transition(
            ids,
            SyncStatus::Processed,
            None,
            "sync_status = 'SYNCED'",
        )
        .await
    }

    async fn cleanup(&self, older_than: i64) -> Result<u64> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM sync_messages
                 WHERE sync_status IN ('SYNCED', 'PROCESSED') AND created_at < ?",
                [older_than],
            )
            .await?;
        Ok(deleted)
    }

    async fn count_by_status(&self) -> Result<Vec<(SyncStatus, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT sync_status, COUNT(*) FROM sync_messages GROUP BY sync_status",
                (),
            )
            .await?;

        let mut counts: Vec<(SyncStatus, u64)> =
            SyncStatus::ALL.iter().map(|status| (*status, 0)).collect();
        while let Some(row) = rows.next().await? {
            let status: SyncStatus = row.get::<String>(0)?.parse()?;
            let count = u64::try_from(row.get::<i64>(1)?).unwrap_or(0);
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == status) {
                entry.1 = count;
            }
        }
        Ok(counts)
    }

    async fn latest_timestamp_for_node(&self, node_id: &str) -> Result<Option<HlcTimestamp>> {
        let mut rows = self
            .conn
            .query(
                "SELECT hlc_wall, hlc_logical FROM sync_messages
                 WHERE hlc_node = ?
                 ORDER BY hlc_wall DESC, hlc_logical DESC
                 LIMIT 1",
                [node_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let logical = i32::try_from(row.get::<i64>(1)?)
            .map_err(|_| Error::Database("hlc_logical out of range".into()))?;
        Ok(Some(HlcTimestamp::new(row.get::<i64>(0)?, logical, node_id)))
    }
}
