use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::{channels, messages, pool, threads, DbPool};
use crate::error::{ImportError, Result};
use crate::services::import::store::{
    ChannelStore, MessageStore, MessageWrite, NewImportedMessage, ThreadWrite,
};
use crate::types::{ChannelSyncStatus, MessageChannel, SyncCursor};

/// SQLite-backed channel and message store
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::new(pool::create_pool(db_path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(pool::in_memory()?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn load_channel(&self, channel_id: &str) -> Result<MessageChannel> {
        channels::get_channel(&self.pool, channel_id)?
            .ok_or_else(|| ImportError::ChannelNotFound(channel_id.to_string()))
    }

    async fn acquire_run(&self, channel_id: &str, run_token: &str) -> Result<bool> {
        channels::try_acquire(&self.pool, channel_id, run_token)
    }

    async fn commit_cursor(&self, channel_id: &str, run_token: &str, cursor: &SyncCursor) -> Result<()> {
        channels::commit_cursor(&self.pool, channel_id, run_token, cursor)
    }

    async fn release_run(
        &self,
        channel_id: &str,
        run_token: &str,
        status: ChannelSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        channels::release(&self.pool, channel_id, run_token, status, last_error)
    }

    async fn release_stale_runs(&self, started_before: DateTime<Utc>) -> Result<usize> {
        channels::release_stale(&self.pool, started_before)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn existing_message_ids(&self, channel_id: &str, provider_message_ids: &[String]) -> Result<HashSet<String>> {
        messages::existing_message_ids(&self.pool, channel_id, provider_message_ids)
    }

    async fn resolve_threads(&self, workspace_id: &str, keys: &[String]) -> Result<HashMap<String, String>> {
        threads::resolve_threads(&self.pool, workspace_id, keys)
    }

    async fn get_or_create_threads(&self, workspace_id: &str, keys: &[String]) -> Result<Vec<ThreadWrite>> {
        threads::get_or_create_threads(&self.pool, workspace_id, keys)
            .map_err(|e| ImportError::Persistence(e.to_string()))
    }

    async fn upsert_messages(&self, batch: &[NewImportedMessage]) -> Result<Vec<MessageWrite>> {
        messages::insert_messages(&self.pool, batch)
            .map_err(|e| ImportError::Persistence(e.to_string()))
    }
}
