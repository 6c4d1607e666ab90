pub mod common;
pub mod completions;
pub mod course;
pub mod outbox;
pub mod session;
pub mod sync;
pub mod table;
