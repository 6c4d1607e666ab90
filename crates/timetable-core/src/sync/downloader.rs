//! Downloader: fetches remote messages per entity type.

use std::sync::Arc;

use crate::models::{EntityType, SyncMessage};

use super::codec;
use super::error::{SyncError, SyncResult};
use super::transport::SyncTransport;

/// Decoded messages of one download plus the relay cursor they reach.
#[derive(Debug, Default)]
pub struct DownloadBatch {
    pub messages: Vec<SyncMessage>,
    /// Highest relay sequence number served, dropped documents included;
    /// `None` when the relay does not number its messages
    pub cursor: Option<i64>,
}

pub struct Downloader<T> {
    transport: Arc<T>,
}

impl<T: SyncTransport> Downloader<T> {
    pub const fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Messages of `entity_type` from other devices that reached the relay
    /// after cursor `since`.
    ///
    /// Unsupported types return nothing without contacting the relay.
    /// Envelopes that fail to decode are logged and dropped.
    pub async fn download_since(
        &self,
        entity_type: EntityType,
        exclude_origin_device_id: &str,
        since: Option<i64>,
    ) -> SyncResult<DownloadBatch> {
        if !entity_type.is_supported() {
            return Ok(DownloadBatch::default());
        }

        let response = self
            .transport
            .download(entity_type, exclude_origin_device_id, since)
            .await?;
        if !response.is_success() {
            return Err(SyncError::Application {
                code: response.code,
                message: response.message,
            });
        }

        let mut batch = DownloadBatch::default();
        for raw in response.data.unwrap_or_default() {
            if let Some(seq) = codec::relay_sequence(&raw) {
                batch.cursor = batch.cursor.max(Some(seq));
            }
            match codec::decode(raw) {
                Ok(message) if message.entity_type != entity_type => {
                    tracing::warn!(
                        expected = %entity_type,
                        actual = %message.entity_type,
                        id = %message.id,
                        "Dropping envelope of unexpected type"
                    );
                }
                // Relays that ignore the filter must not echo our own writes back
                Ok(message) if message.origin_device_id == exclude_origin_device_id => {}
                Ok(message) => batch.messages.push(message),
                Err(error) => {
                    tracing::warn!(entity_type = %entity_type, "Dropping undecodable envelope: {error}");
                }
            }
        }

        tracing::debug!(
            entity_type = %entity_type,
            count = batch.messages.len(),
            cursor = ?batch.cursor,
            "Downloaded messages"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::OperationType;
    use crate::sync::test_support::FakeTransport;
    use crate::sync::HlcTimestamp;

    fn envelope(key: &str, origin: &str, wall: i64) -> serde_json::Value {
        let message = SyncMessage::new_local(
            key,
            EntityType::Table,
            OperationType::Create,
            HlcTimestamp::new(wall, 0, origin),
            "{}",
            1,
        );
        serde_json::to_value(codec::encode(&message).unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsupported_type_makes_no_request() {
        let transport = FakeTransport::new();
        let downloader = Downloader::new(transport.clone());

        let batch = downloader
            .download_since(EntityType::User, "device-a", None)
            .await
            .unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.cursor, None);
        assert!(transport.download_calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bad_envelopes_are_dropped_not_fatal() {
        let transport = FakeTransport::new();
        transport.push_raw(EntityType::Table, envelope("t1", "device-b", 100));
        transport.push_raw(EntityType::Table, json!({"id": "broken"}));
        let mut nested_broken = envelope("t2", "device-b", 110);
        nested_broken["messageData"] = json!("{not json");
        transport.push_raw(EntityType::Table, nested_broken);
        transport.push_raw(EntityType::Table, envelope("t3", "device-b", 120));

        let downloader = Downloader::new(transport.clone());
        let batch = downloader
            .download_since(EntityType::Table, "device-a", None)
            .await
            .unwrap();

        let keys: Vec<&str> = batch.messages.iter().map(|m| m.crdt_key.as_str()).collect();
        assert_eq!(keys, vec!["t1", "t3"]);
        // Broken documents are not fetched again
        assert_eq!(batch.cursor, Some(4));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cursor_skips_earlier_arrivals_not_earlier_clocks() {
        let transport = FakeTransport::new();
        transport.push_raw(EntityType::Table, envelope("seen", "device-b", 500));
        transport.push_raw(EntityType::Table, envelope("mine", "device-a", 600));
        // Arrives last but carries the oldest clock
        transport.push_raw(EntityType::Table, envelope("late", "device-c", 100));

        let downloader = Downloader::new(transport.clone());
        let batch = downloader
            .download_since(EntityType::Table, "device-a", Some(1))
            .await
            .unwrap();

        let keys: Vec<&str> = batch.messages.iter().map(|m| m.crdt_key.as_str()).collect();
        assert_eq!(keys, vec!["late"]);
        assert_eq!(batch.cursor, Some(3));
        assert_eq!(transport.download_calls(), vec![(EntityType::Table, Some(1))]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unnumbered_relay_leaves_cursor_unset() {
        let transport = FakeTransport::new();
        transport.serve_without_sequence();
        transport.push_raw(EntityType::Table, envelope("t1", "device-b", 100));

        let batch = Downloader::new(transport.clone())
            .download_since(EntityType::Table, "device-a", None)
            .await
            .unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.cursor, None);
    }
}
