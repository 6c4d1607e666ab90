//! Device registry: binds this device to a user on the relay.

use std::sync::Arc;

use super::codec::DeviceRegistration;
use super::error::{SyncError, SyncResult};
use super::transport::SyncTransport;

pub struct DeviceRegistry<T> {
    transport: Arc<T>,
    device_id: String,
}

impl<T: SyncTransport> DeviceRegistry<T> {
    pub const fn new(transport: Arc<T>, device_id: String) -> Self {
        Self {
            transport,
            device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Register this device for `user_id`. Safe to repeat.
    ///
    /// Never fails: every problem is logged and reported as `false`.
    pub async fn register_device(&self, user_id: i64) -> bool {
        match self.try_register(user_id).await {
            Ok(()) => {
                tracing::debug!(device_id = %self.device_id, user_id, "Device registered");
                true
            }
            Err(error) => {
                tracing::error!(device_id = %self.device_id, user_id, "{error}");
                false
            }
        }
    }

    async fn try_register(&self, user_id: i64) -> SyncResult<()> {
        if self.device_id.trim().is_empty() {
            return Err(SyncError::DeviceRegistration(
                "device id must not be blank".to_string(),
            ));
        }
        if user_id <= 0 {
            return Err(SyncError::DeviceRegistration(format!(
                "invalid user id {user_id}"
            )));
        }

        let registration = DeviceRegistration {
            device_id: self.device_id.clone(),
            user_id,
        };
        let response = self.transport.register_device(&registration).await?;
        if !response.is_success() {
            return Err(SyncError::Application {
                code: response.code,
                message: response.message,
            });
        }

        match response.data {
            Some(record) if record.user_id != user_id => Err(SyncError::DeviceRegistration(
                format!(
                    "device {} is bound to user {}, not {user_id}",
                    record.id, record.user_id
                ),
            )),
            _ => Ok(()),
        }
    }
}
