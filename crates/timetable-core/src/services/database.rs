//! Shared database service wrapper used by the sync engine and clients.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    apply_local, apply_remote, ApplyOutcome, Database, EntityStore, LibSqlEntityStore,
    LibSqlOutboxRepository, LibSqlSyncStateRepository, OutboxRepository, SyncStateRepository,
};
use crate::models::{
    Course, CourseNode, EntitySnapshot, EntityType, LocalUser, SyncMessage, SyncStatus, Table,
    TimeSlot,
};
use crate::sync::HlcTimestamp;
use crate::Result;

/// Thread-safe service for DB and repository operations.
///
/// Each method holds the connection lock for its whole duration, so every
/// status-changing operation is isolated while readers interleave between them.
#[derive(Clone)]
pub struct SyncDatabase {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SyncDatabase {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!(path = %db_path.display(), "Opened local database");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    // Sync state

    /// Durable id of this device.
    pub async fn device_id(&self) -> Result<String> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .device_id()
            .await
    }

    pub async fn current_user_id(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .current_user_id()
            .await
    }

    pub async fn set_current_user_id(&self, user_id: Option<i64>) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .set_current_user_id(user_id)
            .await
    }

    pub async fn watermark(&self, entity_type: EntityType) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .watermark(entity_type)
            .await
    }

    pub async fn advance_watermark(&self, entity_type: EntityType, cursor: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .advance_watermark(entity_type, cursor)
            .await
    }

    // Outbox

    /// Apply a local mutation and queue its message, atomically.
    pub async fn record_local(&self, message: &SyncMessage, snapshot: &EntitySnapshot) -> Result<()> {
        let db = self.db.lock().await;
        apply_local(db.connection(), message, snapshot).await
    }

    pub async fn append(&self, message: &SyncMessage) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .append(message)
            .await
    }

    pub async fn append_batch(&self, messages: &[SyncMessage]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .append_batch(messages)
            .await
    }

    /// Store a downloaded message; returns false when its id is already known.
    pub async fn insert_remote(&self, message: &SyncMessage) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .insert_remote(message)
            .await
    }

    pub async fn query_pending(&self) -> Result<Vec<SyncMessage>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .query_pending()
            .await
    }

    pub async fn query_pending_by_user(&self, user_id: i64) -> Result<Vec<SyncMessage>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .query_pending_by_user(user_id)
            .await
    }

    pub async fn query_pending_by_type(&self, entity_type: EntityType) -> Result<Vec<SyncMessage>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .query_pending_by_type(entity_type)
            .await
    }

    pub async fn query_pending_for(
        &self,
        user_id: i64,
        entity_type: EntityType,
    ) -> Result<Vec<SyncMessage>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .query_pending_for(user_id, entity_type)
            .await
    }

    pub async fn query_unapplied(&self, local_device_id: &str) -> Result<Vec<SyncMessage>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .query_unapplied(local_device_id)
            .await
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<SyncMessage>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).get(id).await
    }

    pub async fn mark_synced(&self, ids: &[String]) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_synced(ids)
            .await
    }

    pub async fn mark_failed(&self, ids: &[String], reason: &str) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_failed(ids, reason)
            .await
    }

    pub async fn mark_processed(&self, ids: &[String]) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_processed(ids)
            .await
    }

    /// Delete delivered messages created before `older_than` (Unix ms).
    pub async fn cleanup(&self, older_than: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .cleanup(older_than)
            .await
    }

    pub async fn count_by_status(&self) -> Result<Vec<(SyncStatus, u64)>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .count_by_status()
            .await
    }

    pub async fn latest_timestamp_for_node(&self, node_id: &str) -> Result<Option<HlcTimestamp>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .latest_timestamp_for_node(node_id)
            .await
    }

    // Entities

    /// Apply a downloaded message and mark it processed, atomically.
    pub async fn apply_remote(&self, message: &SyncMessage) -> Result<ApplyOutcome> {
        let db = self.db.lock().await;
        apply_remote(db.connection(), message).await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<LocalUser>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection()).get_user(user_id).await
    }

    pub async fn get_table(&self, crdt_key: &str) -> Result<Option<Table>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .get_table(crdt_key)
            .await
    }

    pub async fn list_tables(&self, user_id: i64) -> Result<Vec<Table>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .list_tables(user_id)
            .await
    }

    pub async fn get_course(&self, crdt_key: &str) -> Result<Option<Course>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .get_course(crdt_key)
            .await
    }

    pub async fn list_courses(&self, table_crdt_key: &str) -> Result<Vec<Course>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .list_courses(table_crdt_key)
            .await
    }

    pub async fn list_course_nodes(&self, course_crdt_key: &str) -> Result<Vec<CourseNode>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .list_course_nodes(course_crdt_key)
            .await
    }

    pub async fn list_time_slots(&self, user_id: i64) -> Result<Vec<TimeSlot>> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .list_time_slots(user_id)
            .await
    }
}
