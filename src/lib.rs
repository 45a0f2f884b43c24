//! Message import pipeline
//!
//! Pulls messages from a connected mailbox page by page, drops the ones that must
//! not reach the CRM (blocklisted participants, calendar invites), skips what was
//! already imported, groups the rest into threads and stores them. The channel's
//! cursor only advances once a page is durable.
//!
//! ## Module Organization
//!
//! - `types/`: Channels, raw and imported messages, run reports
//! - `backend/`: Provider seam (`MessageProvider`)
//! - `services/`: Blocklist rules, the import pipeline, logging
//! - `adapters/`: SQLite storage
//! - `state/`: Run scheduling across channels
//! - `config/`: Configuration management

pub mod adapters;
pub mod backend;
pub mod config;
pub mod error;
pub mod services;
pub mod state;
pub mod types;

pub use adapters::sqlite::{SqliteBlocklist, SqliteStore};
pub use backend::{MessageProvider, ProviderPage};
pub use config::ImportConfig;
pub use error::{ImportError, ProviderErrorKind, Result};
pub use services::blocklist::BlocklistLookup;
pub use services::import::filters::{Filter, FilterPipeline};
pub use services::import::{CancelHandle, Collaborators, RetryPolicy, SyncEvent, SyncOrchestrator};
pub use state::SyncManager;
pub use types::*;

use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Bring the importer up: logging, configuration, database and stale-lock recovery.
///
/// `config_path` overrides the default config locations.
pub async fn start(config_path: Option<&Path>, provider: Arc<dyn MessageProvider>) -> Result<SyncManager> {
    services::logger::init();

    match config_path {
        Some(path) => config::init_config_from_path(path)?,
        None => config::init_config()?,
    }
    let config = config::get_config();

    let manager = SyncManager::from_config(&config, provider)?;
    manager.recover_stale_runs().await?;

    info!("Message import ready ({:?})", config.database.path);
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::channels;
    use crate::services::import::testing::{message, ScriptedProvider};
    use std::io::Write;

    #[tokio::test]
    async fn test_start_wires_config_and_database() {
        let _guard = config::GLOBAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("import.db");
        let config_path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "[database]\npath = \"{}\"\n\n[sync]\nstale_run_minutes = 0", db_path.display()).unwrap();

        // Leave a lock behind as a crashed process would
        let store = SqliteStore::open(&db_path).unwrap();
        channels::register_channel(
            store.pool(),
            &NewChannel {
                id: "c1".into(),
                workspace_id: "w1".into(),
                handle: "me@corp.com".into(),
                provider: "google".into(),
            },
        )
        .unwrap();
        assert!(channels::try_acquire(store.pool(), "c1", "crashed").unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let provider = Arc::new(ScriptedProvider::new().page(None, vec![message("m1", 1)], None, false));
        let manager = start(Some(&config_path), provider).await.unwrap();

        assert_eq!(config::get_config().database.path, db_path);
        let report = manager.run_channel("c1").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.messages_imported, 1);
    }
}
