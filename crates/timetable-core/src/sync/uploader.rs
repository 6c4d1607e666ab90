//! Uploader: pushes outbox batches to the relay.

use std::sync::Arc;

use crate::models::{EntityType, SyncMessage};
use crate::services::SyncDatabase;

use super::codec::{self, WireEnvelope};
use super::error::{SyncError, SyncResult};
use super::transport::SyncTransport;

/// Sends one batch per request and settles every message of the batch the same way.
pub struct Uploader<T> {
    db: SyncDatabase,
    transport: Arc<T>,
    device_id: String,
}

impl<T: SyncTransport> Uploader<T> {
    pub const fn new(db: SyncDatabase, transport: Arc<T>, device_id: String) -> Self {
        Self {
            db,
            transport,
            device_id,
        }
    }

    /// Upload `messages` as one request; returns the ids marked SYNCED.
    ///
    /// On any failure every message in the batch is marked FAILED with the
    /// reason and the result is empty. Only storage errors while recording
    /// the outcome are returned as `Err`.
    pub async fn upload_batch(
        &self,
        messages: &[SyncMessage],
        entity_type: EntityType,
    ) -> crate::Result<Vec<String>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = messages.iter().map(|message| message.id.clone()).collect();
        match self.send(messages, entity_type).await {
            Ok(()) => {
                self.db.mark_synced(&ids).await?;
                tracing::info!(entity_type = %entity_type, count = ids.len(), "Uploaded batch");
                Ok(ids)
            }
            Err(error) => {
                let reason = failure_reason(&error);
                self.db.mark_failed(&ids, &reason).await?;
                tracing::warn!(
                    entity_type = %entity_type,
                    count = ids.len(),
                    retryable = error.is_retryable(),
                    "Upload failed: {error}"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn send(&self, messages: &[SyncMessage], entity_type: EntityType) -> SyncResult<()> {
        let envelopes = messages
            .iter()
            .map(codec::encode)
            .collect::<Result<Vec<WireEnvelope>, _>>()?;

        let response = self
            .transport
            .upload(&self.device_id, entity_type, &envelopes)
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SyncError::Application {
                code: response.code,
                message: response.message,
            })
        }
    }
}

/// Text stored in `syncError`, tagged with the advisory retry hint.
fn failure_reason(error: &SyncError) -> String {
    let hint = if error.is_retryable() {
        "retryable"
    } else {
        "permanent"
    };
    format!("[{hint}] {error}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{OperationType, SyncStatus};
    use crate::sync::error::TransportError;
    use crate::sync::test_support::FakeTransport;
    use crate::sync::HlcTimestamp;

    async fn setup() -> (SyncDatabase, Arc<FakeTransport>, Uploader<FakeTransport>) {
        let db = SyncDatabase::open_in_memory().await.unwrap();
        let transport = FakeTransport::new();
        let uploader = Uploader::new(db.clone(), transport.clone(), "device-a".to_string());
        (db, transport, uploader)
    }

    async fn queue(db: &SyncDatabase, count: i64) -> Vec<SyncMessage> {
        let messages: Vec<SyncMessage> = (0..count)
            .map(|i| {
                SyncMessage::new_local(
                    format!("t{i}"),
                    EntityType::Table,
                    OperationType::Create,
                    HlcTimestamp::new(100 + i, 0, "device-a"),
                    "{}",
                    1,
                )
            })
            .collect();
        db.append_batch(&messages).await.unwrap();
        messages
    }

    async fn statuses(db: &SyncDatabase, messages: &[SyncMessage]) -> Vec<SyncStatus> {
        let mut statuses = Vec::new();
        for message in messages {
            let stored = db.get_message(&message.id).await.unwrap().unwrap();
            statuses.push(stored.sync_status);
        }
        statuses
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_batch_makes_no_request() {
        let (_db, transport, uploader) = setup().await;
        let ids = uploader.upload_batch(&[], EntityType::Table).await.unwrap();
        assert!(ids.is_empty());
        assert!(transport.upload_calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_success_marks_whole_batch_synced() {
        let (db, transport, uploader) = setup().await;
        let messages = queue(&db, 3).await;

        let ids = uploader.upload_batch(&messages, EntityType::Table).await.unwrap();

        assert_eq!(ids.len(), 3);
        assert_eq!(transport.upload_calls(), vec![(EntityType::Table, 3)]);
        assert_eq!(statuses(&db, &messages).await, vec![SyncStatus::Synced; 3]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_application_rejection_fails_whole_batch() {
        let (db, transport, uploader) = setup().await;
        transport.reject_uploads(409);
        let messages = queue(&db, 4).await;

        let ids = uploader.upload_batch(&messages, EntityType::Table).await.unwrap();

        assert!(ids.is_empty());
        assert_eq!(statuses(&db, &messages).await, vec![SyncStatus::Failed; 4]);
        let stored = db.get_message(&messages[0].id).await.unwrap().unwrap();
        let reason = stored.sync_error.unwrap();
        assert!(reason.starts_with("[permanent]"));
        assert!(reason.contains("409"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transport_error_records_retry_hint_and_keeps_messages() {
        let (db, transport, uploader) = setup().await;
        transport.fail_uploads(TransportError::Status {
            status: 503,
            body: "maintenance".into(),
        });
        let messages = queue(&db, 2).await;

        uploader.upload_batch(&messages, EntityType::Table).await.unwrap();

        let stored = db.get_message(&messages[1].id).await.unwrap().unwrap();
        assert!(stored.sync_error.unwrap().starts_with("[retryable]"));
        // FAILED rows are picked up again by the next pending query
        assert_eq!(db.query_pending().await.unwrap().len(), 2);

        transport.heal();
        let pending = db.query_pending().await.unwrap();
        let ids = uploader.upload_batch(&pending, EntityType::Table).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(statuses(&db, &messages).await, vec![SyncStatus::Synced; 2]);
    }
}
