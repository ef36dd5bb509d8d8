pub mod database;
pub mod state_store;

pub use database::Database;
pub use state_store::{LOCK_INDEX_NAME, SqliteStateStore};
