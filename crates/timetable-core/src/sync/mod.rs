//! Offline-first synchronization: clock, wire codec, relay transport and the
//! components of one sync cycle.

mod codec;
mod device;
mod downloader;
mod engine;
mod error;
mod hlc;
mod reconciler;
mod transport;
mod uploader;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{
    decode, decode_envelope, encode, ApiResponse, DeviceRecord, DeviceRegistration, MessageData,
    WireEnvelope, DEVICE_ID_HEADER, SUCCESS_CODE,
};
pub use device::DeviceRegistry;
pub use downloader::{DownloadBatch, Downloader};
pub use engine::{SyncCycleReport, SyncEngine};
pub use error::{ProtocolError, SyncError, SyncResult, TransportError};
pub use hlc::{HlcTimestamp, HybridLogicalClock, SystemClock, WallClock};
pub use reconciler::{ReconcileReport, Reconciler};
pub use transport::{HttpSyncTransport, SyncTransport};
pub use uploader::Uploader;
