//! Database layer for Timetable

mod apply;
mod connection;
mod entity_store;
mod migrations;
mod outbox;
mod sync_state_repository;
mod values;

pub use apply::{apply_local, apply_remote, ApplyOutcome};
pub use connection::{in_transaction, Database};
pub use entity_store::{EntityStore, EntityVersion, LibSqlEntityStore};
pub use outbox::{LibSqlOutboxRepository, OutboxRepository};
pub use sync_state_repository::{LibSqlSyncStateRepository, SyncStateRepository};
