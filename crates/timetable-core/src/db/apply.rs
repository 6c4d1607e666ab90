//! Applying sync messages to the local entity store.

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::{EntitySnapshot, EntityType, OperationType, SyncMessage};

use super::connection::in_transaction;
use super::entity_store::{EntityStore, LibSqlEntityStore};
use super::outbox::{LibSqlOutboxRepository, OutboxRepository};

/// Result of applying one remote message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Local state now reflects the message
    Applied,
    /// This write or a later one was already applied for this key
    Stale,
    /// The referenced parent is not present locally; nothing was written
    MissingParent {
        entity_type: EntityType,
        crdt_key: String,
    },
}

/// Apply a downloaded message and mark it processed, in one transaction.
///
/// Messages older than the key's recorded version are marked processed
/// without touching local state, so repeated delivery is a no-op and a
/// tombstone outranks any older CREATE or UPDATE.
pub async fn apply_remote(conn: &Connection, message: &SyncMessage) -> Result<ApplyOutcome> {
    in_transaction(conn, || async {
        let store = LibSqlEntityStore::new(conn);
        let outbox = LibSqlOutboxRepository::new(conn);
        let ids = [message.id.clone()];

        if let Some(version) = store.version(&message.crdt_key).await? {
            if version.covers(message) {
                outbox.mark_processed(&ids).await?;
                return Ok(ApplyOutcome::Stale);
            }
        }

        let snapshot = decode_snapshot(message)?;
        if let Some(snapshot) = &snapshot {
            if let Some((entity_type, crdt_key)) = store.missing_parent(snapshot).await? {
                return Ok(ApplyOutcome::MissingParent {
                    entity_type,
                    crdt_key,
                });
            }
        }

        write_entity(&store, message, snapshot.as_ref()).await?;
        outbox.mark_processed(&ids).await?;
        Ok(ApplyOutcome::Applied)
    })
    .await
}

/// Apply a local mutation and queue it for upload, in one transaction.
pub async fn apply_local(
    conn: &Connection,
    message: &SyncMessage,
    snapshot: &EntitySnapshot,
) -> Result<()> {
    in_transaction(conn, || async {
        let store = LibSqlEntityStore::new(conn);

        if message.operation_type != OperationType::Delete {
            if let Some((entity_type, crdt_key)) = store.missing_parent(snapshot).await? {
                return Err(Error::InvalidInput(format!(
                    "{} '{}' references missing {entity_type} '{crdt_key}'",
                    message.entity_type, message.crdt_key
                )));
            }
        }

        let snapshot = (message.operation_type != OperationType::Delete).then_some(snapshot);
        write_entity(&store, message, snapshot).await?;
        LibSqlOutboxRepository::new(conn).append(message).await
    })
    .await
}

/// Payload snapshot for upserts; DELETE carries no state that needs decoding.
fn decode_snapshot(message: &SyncMessage) -> Result<Option<EntitySnapshot>> {
    if message.operation_type == OperationType::Delete {
        return Ok(None);
    }

    let snapshot = EntitySnapshot::from_payload(message.entity_type, &message.payload)?;
    if snapshot.crdt_key() != message.crdt_key {
        return Err(Error::InvalidInput(format!(
            "payload key '{}' does not match message key '{}'",
            snapshot.crdt_key(),
            message.crdt_key
        )));
    }
    Ok(Some(snapshot))
}

async fn write_entity(
    store: &LibSqlEntityStore<'_>,
    message: &SyncMessage,
    snapshot: Option<&EntitySnapshot>,
) -> Result<()> {
    match snapshot {
        None => {
            let existed = store.delete(message.entity_type, &message.crdt_key).await?;
            if !existed {
                tracing::debug!(
                    entity_type = %message.entity_type,
                    crdt_key = %message.crdt_key,
                    "Delete for unknown entity"
                );
            }
        }
        Some(snapshot) => {
            store.upsert(snapshot).await?;
            if let EntitySnapshot::Table(table) = snapshot {
                if table.is_default_sentinel()
                    && store.set_default_table(table.user_id, &table.crdt_key).await?
                {
                    tracing::info!(
                        user_id = table.user_id,
                        crdt_key = %table.crdt_key,
                        "Default table updated"
                    );
                }
            }
        }
    }

    store.record_version(message, snapshot.is_none()).await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::Database;
    use crate::models::{Course, SyncStatus, Table, DEFAULT_TABLE_NAME};
    use crate::sync::HlcTimestamp;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn remote(
        snapshot: &EntitySnapshot,
        operation: OperationType,
        timestamp: HlcTimestamp,
    ) -> SyncMessage {
        let mut message = SyncMessage::new_local(
            snapshot.crdt_key(),
            snapshot.entity_type(),
            operation,
            timestamp,
            snapshot.to_payload().unwrap(),
            1,
        );
        message.sync_status = SyncStatus::Synced;
        message
    }

    async fn receive(db: &Database, message: &SyncMessage) -> ApplyOutcome {
        let conn = db.connection();
        LibSqlOutboxRepository::new(conn)
            .insert_remote(message)
            .await
            .unwrap();
        apply_remote(conn, message).await.unwrap()
    }

    async fn status_of(db: &Database, id: &str) -> SyncStatus {
        LibSqlOutboxRepository::new(db.connection())
            .get(id)
            .await
            .unwrap()
            .unwrap()
            .sync_status
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_is_idempotent() {
        let db = setup().await;
        let table = Table::new(1, "Fall2024");
        let message = remote(
            &EntitySnapshot::Table(table.clone()),
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
        );

        assert_eq!(receive(&db, &message).await, ApplyOutcome::Applied);
        assert_eq!(status_of(&db, &message.id).await, SyncStatus::Processed);
        assert_eq!(
            apply_remote(db.connection(), &message).await.unwrap(),
            ApplyOutcome::Stale
        );

        let store = LibSqlEntityStore::new(db.connection());
        assert_eq!(store.get_table(&table.crdt_key).await.unwrap(), Some(table));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_older_update_is_discarded() {
        let db = setup().await;
        let mut table = Table::new(1, "Fall2024");
        let older = remote(
            &EntitySnapshot::Table(table.clone()),
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
        );
        table.name = "Fall2024-v2".to_string();
        let newer = remote(
            &EntitySnapshot::Table(table.clone()),
            OperationType::Update,
            HlcTimestamp::new(150, 0, "A"),
        );

        assert_eq!(receive(&db, &newer).await, ApplyOutcome::Applied);
        assert_eq!(receive(&db, &older).await, ApplyOutcome::Stale);
        assert_eq!(status_of(&db, &older.id).await, SyncStatus::Processed);

        let store = LibSqlEntityStore::new(db.connection());
        let stored = store.get_table(&table.crdt_key).await.unwrap().unwrap();
        assert_eq!(stored.name, "Fall2024-v2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_millisecond_writes_rank_without_counter() {
        let db = setup().await;
        let mut table = Table::new(1, "A2");
        let snapshot = EntitySnapshot::Table(table.clone());
        let local = SyncMessage::new_local(
            &table.crdt_key,
            EntityType::Table,
            OperationType::Create,
            HlcTimestamp::new(2_000, 1, "A"),
            snapshot.to_payload().unwrap(),
            1,
        );
        apply_local(db.connection(), &local, &snapshot).await.unwrap();

        // Device B sees the write above as 2000.0@A and ranks B's own above it,
        // so this device must do the same
        table.name = "B".to_string();
        let peer = remote(
            &EntitySnapshot::Table(table.clone()),
            OperationType::Update,
            HlcTimestamp::new(2_000, 0, "B"),
        );
        assert_eq!(receive(&db, &peer).await, ApplyOutcome::Applied);

        let store = LibSqlEntityStore::new(db.connection());
        let stored = store.get_table(&table.crdt_key).await.unwrap().unwrap();
        assert_eq!(stored.name, "B");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tombstone_wins_over_older_create() {
        let db = setup().await;
        let table = Table::new(1, "Spring");
        let snapshot = EntitySnapshot::Table(table.clone());
        let delete = remote(&snapshot, OperationType::Delete, HlcTimestamp::new(200, 0, "B"));
        let create = remote(&snapshot, OperationType::Create, HlcTimestamp::new(100, 0, "A"));

        // Delete of an unknown entity is a no-op but still records the tombstone
        assert_eq!(receive(&db, &delete).await, ApplyOutcome::Applied);
        assert_eq!(receive(&db, &create).await, ApplyOutcome::Stale);

        let store = LibSqlEntityStore::new(db.connection());
        assert!(store.get_table(&table.crdt_key).await.unwrap().is_none());
        assert!(store.version(&table.crdt_key).await.unwrap().unwrap().is_deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_parent_leaves_message_unprocessed() {
        let db = setup().await;
        let course = Course::new("absent-table", "Physics");
        let message = remote(
            &EntitySnapshot::Course(course.clone()),
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
        );

        assert_eq!(
            receive(&db, &message).await,
            ApplyOutcome::MissingParent {
                entity_type: EntityType::Table,
                crdt_key: "absent-table".to_string(),
            }
        );
        assert_eq!(status_of(&db, &message.id).await, SyncStatus::Synced);
        let store = LibSqlEntityStore::new(db.connection());
        assert!(store.version(&course.crdt_key).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_default_table_sentinel_sets_default_once() {
        let db = setup().await;
        let table = Table::new(7, DEFAULT_TABLE_NAME);
        let message = remote(
            &EntitySnapshot::Table(table.clone()),
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
        );

        assert_eq!(receive(&db, &message).await, ApplyOutcome::Applied);
        let store = LibSqlEntityStore::new(db.connection());
        let user = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(user.default_table_crdt_key, Some(table.crdt_key.clone()));

        // Redelivery does not touch the default again
        assert!(!store.set_default_table(7, &table.crdt_key).await.unwrap());
        assert_eq!(
            apply_remote(db.connection(), &message).await.unwrap(),
            ApplyOutcome::Stale
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_payload_is_an_error() {
        let db = setup().await;
        let mut message = remote(
            &EntitySnapshot::Table(Table::new(1, "x")),
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
        );
        message.payload = "{not json".to_string();

        let conn = db.connection();
        LibSqlOutboxRepository::new(conn)
            .insert_remote(&message)
            .await
            .unwrap();
        assert!(apply_remote(conn, &message).await.is_err());
        assert_eq!(status_of(&db, &message.id).await, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_local_writes_entity_and_outbox() {
        let db = setup().await;
        let table = Table::new(1, "Fall2024");
        let snapshot = EntitySnapshot::Table(table.clone());
        let message = SyncMessage::new_local(
            table.crdt_key.clone(),
            EntityType::Table,
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
            snapshot.to_payload().unwrap(),
            1,
        );

        apply_local(db.connection(), &message, &snapshot).await.unwrap();

        let store = LibSqlEntityStore::new(db.connection());
        assert_eq!(store.get_table(&table.crdt_key).await.unwrap(), Some(table));
        assert_eq!(status_of(&db, &message.id).await, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_local_rejects_orphan() {
        let db = setup().await;
        let course = Course::new("absent-table", "Physics");
        let snapshot = EntitySnapshot::Course(course.clone());
        let message = SyncMessage::new_local(
            course.crdt_key.clone(),
            EntityType::Course,
            OperationType::Create,
            HlcTimestamp::new(100, 0, "A"),
            snapshot.to_payload().unwrap(),
            1,
        );

        assert!(apply_local(db.connection(), &message, &snapshot).await.is_err());
        let pending = LibSqlOutboxRepository::new(db.connection())
            .query_pending()
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
