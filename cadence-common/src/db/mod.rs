//! SQLite persistence

pub mod init;
pub mod sqlite_store;

pub use init::{create_schema, init_database, open_in_memory};
pub use sqlite_store::SqliteStore;
