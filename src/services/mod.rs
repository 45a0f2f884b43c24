pub mod blocklist;
pub mod import;
pub mod logger;
