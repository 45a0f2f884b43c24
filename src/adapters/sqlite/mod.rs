pub mod pool;
pub mod schema;
pub mod channels;
pub mod blocklist;
pub mod threads;
pub mod messages;
pub mod store;

// Re-export the pool type so callers can do `use crate::adapters::sqlite::DbPool`
pub use pool::DbPool;
pub use blocklist::SqliteBlocklist;
pub use store::SqliteStore;
