//! Wire format shared by the client and the relay.
//!
//! A message travels as a [`WireEnvelope`] whose `messageData` field is itself a
//! JSON document ([`MessageData`]) carrying the operation and the entity
//! payload. Decoding is two-stage and each stage fails independently with a
//! [`ProtocolError`].
//!
//! The wire timestamp is the wall clock only. Decoded messages carry
//! `HLC(wall, 0, originDeviceId)`, so encode then decode is lossy for the
//! logical counter.
//!
//! Envelopes served by the relay also carry `seq`, the relay's arrival
//! sequence number, which clients use as their download cursor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{EntityType, OperationType, SyncMessage, SyncStatus};

use super::error::ProtocolError;
use super::hlc::HlcTimestamp;

/// Application code the relay uses for success.
pub const SUCCESS_CODE: i32 = 200;

/// Header carrying the calling device id on uploads.
pub const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// Outer wire document of one sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub id: String,
    pub user_id: i64,
    pub entity_type: String,
    pub crdt_key: String,
    /// JSON-encoded [`MessageData`]
    pub message_data: String,
    /// Wall clock component of the HLC (Unix ms)
    pub hlc_timestamp: i64,
    pub origin_device_id: String,
    pub created_at: i64,
    /// Arrival sequence assigned by the relay; absent on uploads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

/// Document nested in [`WireEnvelope::message_data`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub operation_type: String,
    /// Entity snapshot; senders use a JSON string, objects are accepted too
    pub message_data: Value,
}

/// Response body used by every relay endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub const fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// `POST /devices` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_id: String,
    pub user_id: i64,
}

/// Device as stored by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub user_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Null until the device completes its first sync
    #[serde(default)]
    pub last_sync_hlc_timestamp: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    pub updated_at: i64,
}

/// Build the wire envelope for an outgoing message.
pub fn encode(message: &SyncMessage) -> Result<WireEnvelope, ProtocolError> {
    let data = MessageData {
        operation_type: message.operation_type.as_str().to_string(),
        message_data: Value::String(message.payload.clone()),
    };
    let message_data = serde_json::to_string(&data)
        .map_err(|error| ProtocolError::MessageData {
            id: message.id.clone(),
            reason: error.to_string(),
        })?;

    Ok(WireEnvelope {
        id: message.id.clone(),
        user_id: message.user_id,
        entity_type: message.entity_type.as_str().to_string(),
        crdt_key: message.crdt_key.clone(),
        message_data,
        hlc_timestamp: message.hlc_timestamp.wall_clock,
        origin_device_id: message.origin_device_id.clone(),
        created_at: message.created_at,
        seq: None,
    })
}

/// Relay sequence number of a downloaded document, read before decoding so
/// that documents which fail to decode still move the cursor.
pub fn relay_sequence(raw: &Value) -> Option<i64> {
    raw.get("seq").and_then(Value::as_i64)
}

/// Decode one envelope as received from the relay into a SYNCED message.
pub fn decode(raw: Value) -> Result<SyncMessage, ProtocolError> {
    let envelope: WireEnvelope = serde_json::from_value(raw)
        .map_err(|error| ProtocolError::Envelope(error.to_string()))?;
    decode_envelope(envelope)
}

/// Second decoding stage: validate fields and unpack `messageData`.
pub fn decode_envelope(envelope: WireEnvelope) -> Result<SyncMessage, ProtocolError> {
    let invalid = |field: &'static str, reason: String| ProtocolError::InvalidField {
        id: envelope.id.clone(),
        field,
        reason,
    };

    let entity_type: EntityType = envelope
        .entity_type
        .parse()
        .map_err(|error: crate::Error| invalid("entityType", error.to_string()))?;
    if envelope.crdt_key.trim().is_empty() {
        return Err(invalid("crdtKey", "must not be empty".to_string()));
    }
    if envelope.origin_device_id.trim().is_empty() {
        return Err(invalid("originDeviceId", "must not be empty".to_string()));
    }

    let data: MessageData = serde_json::from_str(&envelope.message_data).map_err(|error| {
        ProtocolError::MessageData {
            id: envelope.id.clone(),
            reason: error.to_string(),
        }
    })?;
    let operation_type: OperationType = data
        .operation_type
        .parse()
        .map_err(|error: crate::Error| invalid("operationType", error.to_string()))?;
    let payload = match data.message_data {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    };

    Ok(SyncMessage {
        hlc_timestamp: HlcTimestamp::new(envelope.hlc_timestamp, 0, envelope.origin_device_id.clone()),
        id: envelope.id,
        crdt_key: envelope.crdt_key,
        entity_type,
        operation_type,
        origin_device_id: envelope.origin_device_id,
        payload,
        user_id: envelope.user_id,
        sync_status: SyncStatus::Synced,
        sync_error: None,
        created_at: envelope.created_at,
    })
}
