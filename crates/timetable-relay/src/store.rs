//! In-memory relay storage: registered devices and the per-user message log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use timetable_core::models::EntityType;
use timetable_core::sync::{decode_envelope, DeviceRecord, DeviceRegistration, WireEnvelope};
use tokio::sync::Mutex;

use crate::error::AppError;

#[derive(Default)]
struct RelayLog {
    devices: HashMap<String, DeviceRecord>,
    /// Accepted envelopes in arrival order, `seq` set
    messages: Vec<WireEnvelope>,
    message_ids: HashSet<String>,
    last_seq: i64,
}

/// Outcome of one accepted upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub accepted: usize,
    pub duplicates: usize,
}

#[derive(Clone, Default)]
pub struct RelayStore {
    state: Arc<Mutex<RelayLog>>,
}

impl RelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `device_id` to `user_id`. Re-registering for the same user refreshes
    /// `updated_at`; a different user is a conflict.
    pub async fn register_device(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<DeviceRecord, AppError> {
        let device_id = registration.device_id.trim();
        if device_id.is_empty() {
            return Err(AppError::bad_request("deviceId must not be blank"));
        }
        if registration.user_id <= 0 {
            return Err(AppError::bad_request(format!(
                "invalid userId {}",
                registration.user_id
            )));
        }

        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().await;
        let record = state
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord {
                id: device_id.to_string(),
                user_id: registration.user_id,
                name: None,
                last_sync_hlc_timestamp: None,
                created_at: Some(now),
                updated_at: now,
            });
        if record.user_id != registration.user_id {
            return Err(AppError::Conflict(format!(
                "device {device_id} belongs to another user"
            )));
        }
        record.updated_at = now;
        Ok(record.clone())
    }

    pub async fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.state.lock().await.devices.get(device_id).cloned()
    }

    /// Append a batch from `device_id`. The batch is validated as a whole
    /// before anything is stored; already-known ids are skipped.
    ///
    /// Each new envelope gets the next arrival sequence number, whatever
    /// its clock says.
    pub async fn append(
        &self,
        device_id: &str,
        entity_type: EntityType,
        envelopes: Vec<WireEnvelope>,
    ) -> Result<UploadAck, AppError> {
        let mut state = self.state.lock().await;
        let user_id = state
            .devices
            .get(device_id)
            .map(|device| device.user_id)
            .ok_or_else(|| AppError::unauthorized(device_id.to_string()))?;

        for envelope in &envelopes {
            if envelope.entity_type != entity_type.as_str() {
                return Err(AppError::bad_request(format!(
                    "message {} has type {}, expected {}",
                    envelope.id,
                    envelope.entity_type,
                    entity_type.as_str()
                )));
            }
            if envelope.user_id != user_id {
                return Err(AppError::bad_request(format!(
                    "message {} belongs to another user",
                    envelope.id
                )));
            }
            if envelope.id.trim().is_empty() {
                return Err(AppError::bad_request("message id must not be blank"));
            }
            decode_envelope(envelope.clone())
                .map_err(|error| AppError::bad_request(error.to_string()))?;
        }

        let mut ack = UploadAck {
            accepted: 0,
            duplicates: 0,
        };
        let mut newest = None;
        for mut envelope in envelopes {
            if !state.message_ids.insert(envelope.id.clone()) {
                ack.duplicates += 1;
                continue;
            }
            newest = newest.max(Some(envelope.hlc_timestamp));
            state.last_seq += 1;
            envelope.seq = Some(state.last_seq);
            state.messages.push(envelope);
            ack.accepted += 1;
        }

        if let Some(device) = state.devices.get_mut(device_id) {
            device.last_sync_hlc_timestamp = device.last_sync_hlc_timestamp.max(newest);
            device.updated_at = Utc::now().timestamp_millis();
        }
        Ok(ack)
    }

    /// Messages of `entity_type` visible to the user `device_id` belongs to,
    /// in arrival order. `since` is a sequence number already seen by the caller.
    pub async fn list(
        &self,
        device_id: &str,
        entity_type: EntityType,
        exclude_origin: Option<&str>,
        since: Option<i64>,
    ) -> Result<Vec<WireEnvelope>, AppError> {
        let state = self.state.lock().await;
        let user_id = state
            .devices
            .get(device_id)
            .map(|device| device.user_id)
            .ok_or_else(|| AppError::unauthorized(device_id.to_string()))?;

        let since = since.unwrap_or(0);
        Ok(state
            .messages
            .iter()
            .filter(|envelope| envelope.seq.is_some_and(|seq| seq > since))
            .filter(|envelope| envelope.user_id == user_id)
            .filter(|envelope| envelope.entity_type == entity_type.as_str())
            .filter(|envelope| exclude_origin != Some(envelope.origin_device_id.as_str()))
            .cloned()
            .collect())
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn envelope(id: &str, user_id: i64, entity_type: &str, wall: i64, origin: &str) -> WireEnvelope {
        WireEnvelope {
            id: id.to_string(),
            user_id,
            entity_type: entity_type.to_string(),
            crdt_key: format!("key-{id}"),
            message_data: json!({"operationType": "CREATE", "messageData": "{}"}).to_string(),
            hlc_timestamp: wall,
            origin_device_id: origin.to_string(),
            created_at: wall,
            seq: None,
        }
    }

    async fn registered(store: &RelayStore, device_id: &str, user_id: i64) {
        store
            .register_device(&DeviceRegistration {
                device_id: device_id.to_string(),
                user_id,
            })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_is_idempotent_but_user_bound() {
        let store = RelayStore::new();
        registered(&store, "device-a", 1).await;
        registered(&store, "device-a", 1).await;

        let conflict = store
            .register_device(&DeviceRegistration {
                device_id: "device-a".to_string(),
                user_id: 2,
            })
            .await
            .unwrap_err();
        assert!(matches!(conflict, AppError::Conflict(_)));

        let device = store.device("device-a").await.unwrap();
        assert_eq!(device.user_id, 1);
        assert_eq!(device.last_sync_hlc_timestamp, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_requires_registered_device() {
        let store = RelayStore::new();
        let err = store
            .append("ghost", EntityType::Table, vec![envelope("m1", 1, "TABLE", 10, "ghost")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_rejects_whole_batch_on_one_bad_envelope() {
        let store = RelayStore::new();
        registered(&store, "device-a", 1).await;

        let mut broken = envelope("m2", 1, "TABLE", 11, "device-a");
        broken.message_data = "{not json".to_string();
        let err = store
            .append(
                "device-a",
                EntityType::Table,
                vec![envelope("m1", 1, "TABLE", 10, "device-a"), broken],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(store.message_count().await, 0);

        let wrong_type = store
            .append("device-a", EntityType::Table, vec![envelope("m3", 1, "COURSE", 10, "device-a")])
            .await;
        assert!(wrong_type.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_deduplicates_and_tracks_last_sync() {
        let store = RelayStore::new();
        registered(&store, "device-a", 1).await;

        let batch = vec![
            envelope("m1", 1, "TABLE", 10, "device-a"),
            envelope("m2", 1, "TABLE", 30, "device-a"),
        ];
        let first = store.append("device-a", EntityType::Table, batch.clone()).await.unwrap();
        assert_eq!(first, UploadAck { accepted: 2, duplicates: 0 });

        let again = store.append("device-a", EntityType::Table, batch).await.unwrap();
        assert_eq!(again, UploadAck { accepted: 0, duplicates: 2 });
        assert_eq!(store.message_count().await, 2);
        assert_eq!(
            store.device("device-a").await.unwrap().last_sync_hlc_timestamp,
            Some(30)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_scopes_by_user_origin_and_cursor() {
        let store = RelayStore::new();
        registered(&store, "device-a", 1).await;
        registered(&store, "device-b", 1).await;
        registered(&store, "device-x", 2).await;

        store
            .append(
                "device-a",
                EntityType::Table,
                vec![
                    envelope("m2", 1, "TABLE", 20, "device-a"),
                    envelope("m1", 1, "TABLE", 10, "device-a"),
                ],
            )
            .await
            .unwrap();
        store
            .append("device-b", EntityType::Table, vec![envelope("m3", 1, "TABLE", 15, "device-b")])
            .await
            .unwrap();
        store
            .append("device-x", EntityType::Table, vec![envelope("m4", 2, "TABLE", 12, "device-x")])
            .await
            .unwrap();

        let all = store.list("device-b", EntityType::Table, None, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|envelope| envelope.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1", "m3"]);
        let seqs: Vec<Option<i64>> = all.iter().map(|envelope| envelope.seq).collect();
        assert_eq!(seqs, vec![Some(1), Some(2), Some(3)]);

        let others = store
            .list("device-b", EntityType::Table, Some("device-b"), Some(1))
            .await
            .unwrap();
        let ids: Vec<&str> = others.iter().map(|envelope| envelope.id.as_str()).collect();
        assert_eq!(ids, vec!["m1"]);

        let courses = store.list("device-b", EntityType::Course, None, None).await.unwrap();
        assert!(courses.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_late_arrival_with_old_clock_is_listed_after_cursor() {
        let store = RelayStore::new();
        registered(&store, "device-a", 1).await;
        registered(&store, "device-b", 1).await;
        registered(&store, "device-c", 1).await;

        store
            .append("device-a", EntityType::Table, vec![envelope("m1", 1, "TABLE", 2_000, "device-a")])
            .await
            .unwrap();
        let seen = store.list("device-b", EntityType::Table, Some("device-b"), None).await.unwrap();
        let cursor = seen.iter().filter_map(|envelope| envelope.seq).max();

        // Device C was offline with a slow clock and uploads afterwards
        store
            .append("device-c", EntityType::Table, vec![envelope("m2", 1, "TABLE", 1_000, "device-c")])
            .await
            .unwrap();

        let next = store
            .list("device-b", EntityType::Table, Some("device-b"), cursor)
            .await
            .unwrap();
        let ids: Vec<&str> = next.iter().map(|envelope| envelope.id.as_str()).collect();
        assert_eq!(ids, vec!["m2"]);
    }
}
