use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use std::collections::HashSet;
use uuid::Uuid;

use super::DbPool;
use crate::error::{ImportError, Result};
use crate::services::blocklist::{is_handle_blocklisted, normalize_handle, BlocklistLookup};

/// Add an entry. `channel_id = None` applies it to the whole workspace.
pub fn add_entry(
    pool: &DbPool,
    workspace_id: &str,
    channel_id: Option<&str>,
    handle: &str,
) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR IGNORE INTO blocklist (id, workspace_id, channel_id, handle, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            Uuid::new_v4().to_string(),
            workspace_id,
            channel_id,
            normalize_handle(handle),
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn remove_entry(pool: &DbPool, workspace_id: &str, handle: &str) -> Result<usize> {
    let conn = pool.get()?;
    let removed = conn.execute(
        "DELETE FROM blocklist WHERE workspace_id = ?1 AND handle = ?2",
        params![workspace_id, normalize_handle(handle)],
    )?;
    Ok(removed)
}

/// The channel's own handle plus every entry that applies to it.
pub fn entries_for_channel(pool: &DbPool, channel_id: &str) -> Result<(String, Vec<String>)> {
    let conn = pool.get()?;

    let channel_handle: String = conn
        .query_row(
            "SELECT handle FROM message_channels WHERE id = ?1",
            params![channel_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ImportError::ChannelNotFound(channel_id.to_string()),
            other => other.into(),
        })?;

    let mut stmt = conn.prepare(
        "SELECT b.handle FROM blocklist b
           JOIN message_channels c ON c.workspace_id = b.workspace_id
          WHERE c.id = ?1 AND (b.channel_id IS NULL OR b.channel_id = ?1)",
    )?;
    let rows = stmt.query_map(params![channel_id], |row| row.get::<_, String>(0))?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok((channel_handle, entries))
}

/// Blocklist lookup backed by the `blocklist` table.
///
/// Storage failures come back as `ImportError::Lookup` so the filter fails closed.
pub struct SqliteBlocklist {
    pool: DbPool,
}

impl SqliteBlocklist {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn load(&self, channel_id: &str) -> Result<(String, Vec<String>)> {
        entries_for_channel(&self.pool, channel_id)
            .map_err(|e| ImportError::Lookup(format!("channel {}: {}", channel_id, e)))
    }
}

#[async_trait]
impl BlocklistLookup for SqliteBlocklist {
    async fn is_blocklisted(&self, channel_id: &str, handle: &str) -> Result<bool> {
        let (channel_handle, entries) = self.load(channel_id)?;
        Ok(is_handle_blocklisted(&channel_handle, handle, &entries))
    }

    async fn blocklisted_handles(
        &self,
        channel_id: &str,
        handles: &[String],
    ) -> Result<HashSet<String>> {
        let (channel_handle, entries) = self.load(channel_id)?;
        Ok(handles
            .iter()
            .filter(|h| is_handle_blocklisted(&channel_handle, h, &entries))
            .map(|h| normalize_handle(h))
            .collect())
    }
}
