//! Relay transport: the HTTP seam between the engine and the relay server.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::SyncClientConfig;
use crate::models::EntityType;
use crate::util::compact_text;

use super::codec::{ApiResponse, DeviceRecord, DeviceRegistration, WireEnvelope, DEVICE_ID_HEADER};
use super::error::{ProtocolError, SyncResult, TransportError};

/// Requests the engine sends to the relay.
///
/// Envelopes come back undecoded so the downloader can drop bad ones
/// individually.
pub trait SyncTransport: Send + Sync {
    /// `POST /sync/messages/{entityType}`
    fn upload(
        &self,
        device_id: &str,
        entity_type: EntityType,
        envelopes: &[WireEnvelope],
    ) -> impl Future<Output = SyncResult<ApiResponse<Value>>> + Send;

    /// `GET /sync/messages/{entityType}`, excluding messages from `exclude_origin_device_id`.
    ///
    /// `since` is a relay sequence number; only later arrivals are returned.
    fn download(
        &self,
        entity_type: EntityType,
        exclude_origin_device_id: &str,
        since: Option<i64>,
    ) -> impl Future<Output = SyncResult<ApiResponse<Vec<Value>>>> + Send;

    /// `POST /devices`
    fn register_device(
        &self,
        registration: &DeviceRegistration,
    ) -> impl Future<Output = SyncResult<ApiResponse<DeviceRecord>>> + Send;
}

/// `SyncTransport` over HTTP with reqwest
#[derive(Debug, Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSyncTransport {
    pub fn new(config: &SyncClientConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(TransportError::from)?;
        Ok(Self {
            base_url: config.server_url.clone(),
            client,
        })
    }

    fn messages_url(&self, entity_type: EntityType) -> String {
        format!("{}/sync/messages/{}", self.base_url, entity_type.as_str())
    }

    async fn read_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> SyncResult<ApiResponse<T>> {
        let status = response.status();
        let body = response.text().await.map_err(TransportError::from)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: compact_text(&body),
            }
            .into());
        }

        serde_json::from_str(&body).map_err(|error| {
            ProtocolError::Response(format!("{error}: {}", compact_text(&body))).into()
        })
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn upload(
        &self,
        device_id: &str,
        entity_type: EntityType,
        envelopes: &[WireEnvelope],
    ) -> SyncResult<ApiResponse<Value>> {
        let response = self
            .client
            .post(self.messages_url(entity_type))
            .header(DEVICE_ID_HEADER, device_id)
            .json(envelopes)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::read_response(response).await
    }

    async fn download(
        &self,
        entity_type: EntityType,
        exclude_origin_device_id: &str,
        since: Option<i64>,
    ) -> SyncResult<ApiResponse<Vec<Value>>> {
        let mut query = vec![(
            "excludeOriginDeviceId",
            exclude_origin_device_id.to_string(),
        )];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let response = self
            .client
            .get(self.messages_url(entity_type))
            .header(DEVICE_ID_HEADER, exclude_origin_device_id)
            .query(&query)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::read_response(response).await
    }

    async fn register_device(
        &self,
        registration: &DeviceRegistration,
    ) -> SyncResult<ApiResponse<DeviceRecord>> {
        let response = self
            .client
            .post(format!("{}/devices", self.base_url))
            .json(registration)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::read_response(response).await
    }
}
