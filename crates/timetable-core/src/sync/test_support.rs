//! Deterministic collaborators for sync tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::models::EntityType;

use super::codec::{ApiResponse, DeviceRecord, DeviceRegistration, WireEnvelope};
use super::error::{SyncResult, TransportError};
use super::hlc::WallClock;
use super::transport::SyncTransport;

/// Wall clock that only moves when told to.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(millis: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(millis)))
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeState {
    /// Accepted documents with their arrival sequence
    stored: Vec<(EntityType, i64, Value)>,
    unnumbered: bool,
    max_batch: Option<usize>,
    devices: Vec<DeviceRegistration>,
    upload_code: Option<i32>,
    upload_error: Option<TransportError>,
    download_error: Option<TransportError>,
    registration_code: Option<i32>,
    upload_calls: Vec<(EntityType, usize)>,
    download_calls: Vec<(EntityType, Option<i64>)>,
}

/// In-memory relay. Accepted uploads become downloadable by other devices.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer uploads with application `code` instead of 200.
    pub fn reject_uploads(&self, code: i32) {
        self.state().upload_code = Some(code);
    }

    pub fn fail_uploads(&self, error: TransportError) {
        self.state().upload_error = Some(error);
    }

    pub fn fail_downloads(&self, error: TransportError) {
        self.state().download_error = Some(error);
    }

    pub fn reject_registrations(&self, code: i32) {
        self.state().registration_code = Some(code);
    }

    /// Answer uploads of more than `max` envelopes with 413.
    pub fn limit_batch_size(&self, max: usize) {
        self.state().max_batch = Some(max);
    }

    /// Behave like a relay that does not number messages: no `seq`, no cursor filter.
    pub fn serve_without_sequence(&self) {
        self.state().unnumbered = true;
    }

    /// Restore normal behaviour for every request kind.
    pub fn heal(&self) {
        let mut state = self.state();
        state.upload_code = None;
        state.upload_error = None;
        state.download_error = None;
        state.registration_code = None;
    }

    /// Make a raw document downloadable, bypassing upload validation.
    pub fn push_raw(&self, entity_type: EntityType, raw: Value) {
        self.state().store(entity_type, raw);
    }

    pub fn upload_calls(&self) -> Vec<(EntityType, usize)> {
        self.state().upload_calls.clone()
    }

    pub fn download_calls(&self) -> Vec<(EntityType, Option<i64>)> {
        self.state().download_calls.clone()
    }

    pub fn registered_devices(&self) -> Vec<DeviceRegistration> {
        self.state().devices.clone()
    }

    pub fn stored_count(&self) -> usize {
        self.state().stored.len()
    }
}

impl FakeState {
    fn store(&mut self, entity_type: EntityType, raw: Value) {
        let seq = self.stored.last().map_or(1, |(_, seq, _)| seq + 1);
        self.stored.push((entity_type, seq, raw));
    }
}

impl SyncTransport for FakeTransport {
    async fn upload(
        &self,
        _device_id: &str,
        entity_type: EntityType,
        envelopes: &[WireEnvelope],
    ) -> SyncResult<ApiResponse<Value>> {
        let mut state = self.state();
        state.upload_calls.push((entity_type, envelopes.len()));
        if let Some(error) = state.upload_error.clone() {
            return Err(error.into());
        }
        if let Some(code) = state.upload_code {
            return Ok(ApiResponse::failure(code, "rejected by fake relay"));
        }
        if state.max_batch.is_some_and(|max| envelopes.len() > max) {
            return Err(TransportError::Status {
                status: 413,
                body: "batch too large".to_string(),
            }
            .into());
        }

        for envelope in envelopes {
            let raw = serde_json::to_value(envelope)
                .map_err(|error| TransportError::Request(error.to_string()))?;
            state.store(entity_type, raw);
        }
        Ok(ApiResponse::success(Value::from(envelopes.len())))
    }

    async fn download(
        &self,
        entity_type: EntityType,
        exclude_origin_device_id: &str,
        since: Option<i64>,
    ) -> SyncResult<ApiResponse<Vec<Value>>> {
        let mut state = self.state();
        state.download_calls.push((entity_type, since));
        if let Some(error) = state.download_error.clone() {
            return Err(error.into());
        }

        let numbered = !state.unnumbered;
        let messages = state
            .stored
            .iter()
            .filter(|(stored_type, _, _)| *stored_type == entity_type)
            .filter(|(_, seq, _)| !numbered || since.is_none_or(|since| *seq > since))
            .filter(|(_, _, raw)| raw["originDeviceId"].as_str() != Some(exclude_origin_device_id))
            .map(|(_, seq, raw)| {
                let mut raw = raw.clone();
                if numbered {
                    if let Some(fields) = raw.as_object_mut() {
                        fields.insert("seq".to_string(), Value::from(*seq));
                    }
                }
                raw
            })
            .collect();
        Ok(ApiResponse::success(messages))
    }

    async fn register_device(
        &self,
        registration: &DeviceRegistration,
    ) -> SyncResult<ApiResponse<DeviceRecord>> {
        let mut state = self.state();
        if let Some(code) = state.registration_code {
            return Ok(ApiResponse::failure(code, "registration refused"));
        }
        if !state.devices.contains(registration) {
            state.devices.push(registration.clone());
        }
        Ok(ApiResponse::success(DeviceRecord {
            id: registration.device_id.clone(),
            user_id: registration.user_id,
            name: None,
            last_sync_hlc_timestamp: None,
            created_at: Some(0),
            updated_at: 0,
        }))
    }
}
