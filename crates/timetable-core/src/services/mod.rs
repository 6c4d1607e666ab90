//! Services shared across clients.

mod database;

pub use database::SyncDatabase;
