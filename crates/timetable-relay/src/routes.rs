use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use timetable_core::models::EntityType;
use timetable_core::sync::{
    ApiResponse, DeviceRecord, DeviceRegistration, WireEnvelope, DEVICE_ID_HEADER,
};
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::error::AppError;
use crate::store::{RelayStore, UploadAck};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub store: RelayStore,
}

impl AppState {
    pub fn from_config(config: Arc<RelayConfig>) -> Self {
        Self {
            config,
            store: RelayStore::new(),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/devices", post(register_device))
        .route(
            "/sync/messages/{entity_type}",
            post(upload_messages).get(download_messages),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    messages: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        messages: state.store.message_count().await,
    })
}

async fn register_device(
    State(state): State<AppState>,
    Json(registration): Json<DeviceRegistration>,
) -> Result<Json<ApiResponse<DeviceRecord>>, AppError> {
    let record = state.store.register_device(&registration).await?;
    tracing::info!(
        device_id = %record.id,
        user_id = record.user_id,
        "Device registered"
    );
    Ok(Json(ApiResponse::success(record)))
}

async fn upload_messages(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    headers: HeaderMap,
    Json(envelopes): Json<Vec<WireEnvelope>>,
) -> Result<Json<ApiResponse<UploadAck>>, AppError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let device_id = header_device_id(&headers)
        .ok_or_else(|| AppError::unauthorized(format!("missing {DEVICE_ID_HEADER} header")))?;
    if envelopes.len() > state.config.max_batch_size {
        return Err(AppError::TooLarge(format!(
            "{} messages exceeds the limit of {}",
            envelopes.len(),
            state.config.max_batch_size
        )));
    }

    let ack = state
        .store
        .append(&device_id, entity_type, envelopes)
        .await?;
    tracing::info!(
        device_id = %device_id,
        entity_type = entity_type.as_str(),
        accepted = ack.accepted,
        duplicates = ack.duplicates,
        "Messages uploaded"
    );
    Ok(Json(ApiResponse::success(ack)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadQuery {
    exclude_origin_device_id: Option<String>,
    /// Last sequence number the caller has seen
    since: Option<i64>,
}

async fn download_messages(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Value>>>, AppError> {
    let entity_type = parse_entity_type(&entity_type)?;
    let device_id = header_device_id(&headers)
        .or_else(|| query.exclude_origin_device_id.clone())
        .ok_or_else(|| AppError::unauthorized(format!("missing {DEVICE_ID_HEADER} header")))?;

    let envelopes = state
        .store
        .list(
            &device_id,
            entity_type,
            query.exclude_origin_device_id.as_deref(),
            query.since,
        )
        .await?;
    tracing::debug!(
        device_id = %device_id,
        entity_type = entity_type.as_str(),
        count = envelopes.len(),
        "Messages served"
    );

    let data = envelopes
        .into_iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| AppError::bad_request(error.to_string()))?;
    Ok(Json(ApiResponse::success(data)))
}

fn parse_entity_type(raw: &str) -> Result<EntityType, AppError> {
    let entity_type: EntityType = raw
        .parse()
        .map_err(|_| AppError::bad_request(format!("unknown entity type {raw}")))?;
    if !entity_type.is_supported() {
        return Err(AppError::bad_request(format!(
            "entity type {raw} is not synchronized"
        )));
    }
    Ok(entity_type)
}

fn header_device_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DEVICE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn parse_entity_type_accepts_only_synchronized_types() {
        assert_eq!(parse_entity_type("TABLE").unwrap(), EntityType::Table);
        assert_eq!(parse_entity_type("TIME_SLOT").unwrap(), EntityType::TimeSlot);
        assert!(parse_entity_type("USER").is_err());
        assert!(parse_entity_type("NOTE").is_err());
    }

    #[test]
    fn header_device_id_ignores_blank_values() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_device_id(&headers), None);

        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(header_device_id(&headers), None);

        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static(" device-a "));
        assert_eq!(header_device_id(&headers).as_deref(), Some("device-a"));
    }
}
