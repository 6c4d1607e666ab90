//! timetable-core - Core library for Timetable
//!
//! This crate contains the schedule models, the local libSQL store and the
//! offline-first sync engine shared by the CLI and the relay.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncClientConfig;
pub use error::{Error, Result};
pub use services::SyncDatabase;
pub use sync::{HttpSyncTransport, SyncEngine};
