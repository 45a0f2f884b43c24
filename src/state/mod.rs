pub mod sync_manager;

pub use sync_manager::SyncManager;
