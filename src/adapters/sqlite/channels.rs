use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use super::DbPool;
use crate::error::ImportError;
use crate::types::{ChannelSyncStatus, MessageChannel, NewChannel, SyncCursor};

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub fn register_channel(pool: &DbPool, channel: &NewChannel) -> Result<(), ImportError> {
    let conn = pool.get()?;
    let now = Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO message_channels (id, workspace_id, handle, provider, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![channel.id, channel.workspace_id, channel.handle, channel.provider, now],
    )?;
    Ok(())
}

pub fn get_channel(pool: &DbPool, channel_id: &str) -> Result<Option<MessageChannel>, ImportError> {
    let conn = pool.get()?;
    let channel = conn
        .query_row(
            "SELECT id, workspace_id, handle, provider, sync_cursor, sync_status, last_error, last_run_at
             FROM message_channels WHERE id = ?1",
            params![channel_id],
            |row| {
                let cursor: Option<String> = row.get(4)?;
                let status: String = row.get(5)?;
                let last_run_at: Option<i64> = row.get(7)?;
                Ok(MessageChannel {
                    id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    handle: row.get(2)?,
                    provider: row.get(3)?,
                    sync_cursor: cursor.map(SyncCursor::new),
                    sync_status: ChannelSyncStatus::from_str(&status),
                    last_error: row.get(6)?,
                    last_run_at: last_run_at.map(from_millis),
                })
            },
        )
        .optional()?;
    Ok(channel)
}

/// Compare-and-set Idle -> Running. Returns false if the channel is not idle.
pub fn try_acquire(pool: &DbPool, channel_id: &str, run_token: &str) -> Result<bool, ImportError> {
    let conn = pool.get()?;
    let now = Utc::now().timestamp_millis();
    let changed = conn.execute(
        "UPDATE message_channels
            SET sync_status = 'running', run_token = ?1, run_started_at = ?2
          WHERE id = ?3 AND sync_status = 'idle' AND run_token IS NULL",
        params![run_token, now, channel_id],
    )?;
    Ok(changed == 1)
}

pub fn commit_cursor(
    pool: &DbPool,
    channel_id: &str,
    run_token: &str,
    cursor: &SyncCursor,
) -> Result<(), ImportError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE message_channels SET sync_cursor = ?1
          WHERE id = ?2 AND run_token = ?3 AND sync_status = 'running'",
        params![cursor.as_str(), channel_id, run_token],
    )?;
    if changed == 0 {
        return Err(ImportError::Fenced(channel_id.to_string()));
    }
    Ok(())
}

pub fn release(
    pool: &DbPool,
    channel_id: &str,
    run_token: &str,
    status: ChannelSyncStatus,
    last_error: Option<&str>,
) -> Result<(), ImportError> {
    let conn = pool.get()?;
    let now = Utc::now().timestamp_millis();
    let changed = conn.execute(
        "UPDATE message_channels
            SET sync_status = ?1, run_token = NULL, run_started_at = NULL,
                last_error = ?2, last_run_at = ?3
          WHERE id = ?4 AND run_token = ?5",
        params![status.as_str(), last_error, now, channel_id, run_token],
    )?;
    if changed == 0 {
        return Err(ImportError::Fenced(channel_id.to_string()));
    }
    Ok(())
}

pub fn release_stale(pool: &DbPool, started_before: DateTime<Utc>) -> Result<usize, ImportError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE message_channels
            SET sync_status = 'idle', run_token = NULL, run_started_at = NULL,
                last_error = 'stale run released'
          WHERE sync_status = 'running' AND run_started_at < ?1",
        params![started_before.timestamp_millis()],
    )?;
    Ok(changed)
}

/// Clear the Error status after the account was reconnected.
pub fn reconnect_channel(pool: &DbPool, channel_id: &str, reset_cursor: bool) -> Result<(), ImportError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE message_channels
            SET sync_status = 'idle', last_error = NULL,
                sync_cursor = CASE WHEN ?2 THEN NULL ELSE sync_cursor END
          WHERE id = ?1 AND sync_status != 'running'",
        params![channel_id, reset_cursor],
    )?;
    if changed == 0 {
        return Err(ImportError::RunRejected {
            channel_id: channel_id.to_string(),
            reason: "channel is missing or currently running".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::pool;

    fn setup() -> DbPool {
        let pool = pool::in_memory().unwrap();
        register_channel(
            &pool,
            &NewChannel {
                id: "c1".into(),
                workspace_id: "w1".into(),
                handle: "me@corp.com".into(),
                provider: "google".into(),
            },
        )
        .unwrap();
        pool
    }

    #[test]
    fn test_new_channel_is_idle_without_cursor() {
        let pool = setup();
        let channel = get_channel(&pool, "c1").unwrap().unwrap();
        assert_eq!(channel.sync_status, ChannelSyncStatus::Idle);
        assert!(channel.sync_cursor.is_none());
        assert!(get_channel(&pool, "missing").unwrap().is_none());
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let pool = setup();
        assert!(try_acquire(&pool, "c1", "run-a").unwrap());
        assert!(!try_acquire(&pool, "c1", "run-b").unwrap());

        release(&pool, "c1", "run-a", ChannelSyncStatus::Idle, None).unwrap();
        assert!(try_acquire(&pool, "c1", "run-b").unwrap());
    }

    #[test]
    fn test_cursor_commit_is_fenced() {
        let pool = setup();
        assert!(try_acquire(&pool, "c1", "run-a").unwrap());

        let err = commit_cursor(&pool, "c1", "run-b", &SyncCursor::new("p2")).unwrap_err();
        assert!(matches!(err, ImportError::Fenced(_)));

        commit_cursor(&pool, "c1", "run-a", &SyncCursor::new("p2")).unwrap();
        let channel = get_channel(&pool, "c1").unwrap().unwrap();
        assert_eq!(channel.sync_cursor, Some(SyncCursor::new("p2")));
    }

    #[test]
    fn test_release_records_error_status() {
        let pool = setup();
        assert!(try_acquire(&pool, "c1", "run-a").unwrap());
        release(&pool, "c1", "run-a", ChannelSyncStatus::Error, Some("token revoked")).unwrap();

        let channel = get_channel(&pool, "c1").unwrap().unwrap();
        assert_eq!(channel.sync_status, ChannelSyncStatus::Error);
        assert_eq!(channel.last_error.as_deref(), Some("token revoked"));
        assert!(channel.last_run_at.is_some());
        assert!(!try_acquire(&pool, "c1", "run-b").unwrap());

        reconnect_channel(&pool, "c1", true).unwrap();
        let channel = get_channel(&pool, "c1").unwrap().unwrap();
        assert_eq!(channel.sync_status, ChannelSyncStatus::Idle);
        assert!(channel.last_error.is_none());
    }

    #[test]
    fn test_release_stale_runs() {
        let pool = setup();
        assert!(try_acquire(&pool, "c1", "run-a").unwrap());

        let released = release_stale(&pool, Utc::now() - chrono::Duration::minutes(5)).unwrap();
        assert_eq!(released, 0);

        let released = release_stale(&pool, Utc::now() + chrono::Duration::minutes(1)).unwrap();
        assert_eq!(released, 1);
        assert!(try_acquire(&pool, "c1", "run-b").unwrap());
    }
}
