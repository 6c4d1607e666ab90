//! Local sync state: device identity, session, and download watermarks.

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::EntityType;

const DEVICE_ID_KEY: &str = "device_id";
const SESSION_USER_KEY: &str = "session_user_id";
/// Values are relay sequence numbers, not wall clocks.
const WATERMARK_PREFIX: &str = "relay_cursor:";

/// Trait for local sync state operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncStateRepository {
    /// Durable id of this device, created on first use
    async fn device_id(&self) -> Result<String>;

    /// User id of the signed-in session, if any
    async fn current_user_id(&self) -> Result<Option<i64>>;

    /// Store (or clear with `None`) the signed-in user
    async fn set_current_user_id(&self, user_id: Option<i64>) -> Result<()>;

    /// Greatest relay sequence number downloaded for an entity type
    async fn watermark(&self, entity_type: EntityType) -> Result<Option<i64>>;

    /// Raise the download watermark; lower values are ignored
    async fn advance_watermark(&self, entity_type: EntityType, cursor: i64) -> Result<()>;
}

/// libSQL implementation of `SyncStateRepository`
pub struct LibSqlSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_state WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_state WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    fn parse_i64(key: &str, value: &str) -> Result<i64> {
        value
            .trim()
            .parse()
            .map_err(|_| Error::Database(format!("sync_state '{key}' is not an integer")))
    }
}

impl SyncStateRepository for LibSqlSyncStateRepository<'_> {
    async fn device_id(&self) -> Result<String> {
        if let Some(existing) = self.get_value(DEVICE_ID_KEY).await? {
            if !existing.trim().is_empty() {
                return Ok(existing);
            }
        }

        let device_id = uuid::Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO sync_state (key, value) VALUES (?, ?)",
                [DEVICE_ID_KEY, device_id.as_str()],
            )
            .await?;
        tracing::info!(device_id = %device_id, "Generated device id");

        // Re-read so a concurrent first writer wins consistently
        self.get_value(DEVICE_ID_KEY)
            .await?
            .ok_or_else(|| Error::Database("device id was not persisted".into()))
    }

    async fn current_user_id(&self) -> Result<Option<i64>> {
        self.get_value(SESSION_USER_KEY)
            .await?
            .map(|value| Self::parse_i64(SESSION_USER_KEY, &value))
            .transpose()
    }

    async fn set_current_user_id(&self, user_id: Option<i64>) -> Result<()> {
        match user_id {
            Some(user_id) => {
                self.set_value(SESSION_USER_KEY, &user_id.to_string())
                    .await
            }
            None => self.delete_value(SESSION_USER_KEY).await,
        }
    }

    async fn watermark(&self, entity_type: EntityType) -> Result<Option<i64>> {
        let key = format!("{WATERMARK_PREFIX}{entity_type}");
        self.get_value(&key)
            .await?
            .map(|value| Self::parse_i64(&key, &value))
            .transpose()
    }

    async fn advance_watermark(&self, entity_type: EntityType, cursor: i64) -> Result<()> {
        if let Some(current) = self.watermark(entity_type).await? {
            if current >= cursor {
                return Ok(());
            }
        }
        let key = format!("{WATERMARK_PREFIX}{entity_type}");
        self.set_value(&key, &cursor.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_device_id_is_stable() {
        let db = setup().await;
        let repo = LibSqlSyncStateRepository::new(db.connection());

        let first = repo.device_id().await.unwrap();
        let second = repo.device_id().await.unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_user_round_trip() {
        let db = setup().await;
        let repo = LibSqlSyncStateRepository::new(db.connection());

        assert_eq!(repo.current_user_id().await.unwrap(), None);
        repo.set_current_user_id(Some(42)).await.unwrap();
        assert_eq!(repo.current_user_id().await.unwrap(), Some(42));
        repo.set_current_user_id(None).await.unwrap();
        assert_eq!(repo.current_user_id().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watermark_only_moves_forward() {
        let db = setup().await;
        let repo = LibSqlSyncStateRepository::new(db.connection());

        assert_eq!(repo.watermark(EntityType::Table).await.unwrap(), None);
        repo.advance_watermark(EntityType::Table, 500).await.unwrap();
        repo.advance_watermark(EntityType::Table, 300).await.unwrap();
        assert_eq!(repo.watermark(EntityType::Table).await.unwrap(), Some(500));
        assert_eq!(repo.watermark(EntityType::Course).await.unwrap(), None);
    }
}
