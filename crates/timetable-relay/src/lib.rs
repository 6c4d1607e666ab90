//! Relay server for timetable sync: devices upload outbox messages per entity
//! type and download what their other devices produced.

pub mod config;
pub mod error;
pub mod routes;
pub mod store;

pub use config::RelayConfig;
pub use routes::{app_router, AppState};
pub use store::{RelayStore, UploadAck};
