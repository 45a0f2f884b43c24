use chrono::Utc;
use rusqlite::{params, params_from_iter};
use std::collections::HashMap;
use uuid::Uuid;

use super::DbPool;
use crate::error::ImportError;
use crate::services::import::store::{ThreadWrite, WriteStatus};

/// Keep IN lists well under SQLite's bound parameter limit
pub(crate) const CHUNK_SIZE: usize = 400;

pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve keys against thread keys first, then against provider thread ids
/// and provider message ids of messages already imported in the workspace.
pub fn resolve_threads(
    pool: &DbPool,
    workspace_id: &str,
    keys: &[String],
) -> Result<HashMap<String, String>, ImportError> {
    let conn = pool.get()?;
    let mut resolved: HashMap<String, String> = HashMap::new();

    for chunk in keys.chunks(CHUNK_SIZE) {
        let sql = format!(
            "SELECT thread_key, id FROM message_threads
              WHERE workspace_id = ?1 AND thread_key IN ({})",
            placeholders(2, chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let args = std::iter::once(workspace_id).chain(chunk.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, id) = row?;
            resolved.insert(key, id);
        }

        let sql = format!(
            "SELECT m.provider_thread_id, m.provider_message_id, m.thread_id
               FROM imported_messages m
               JOIN message_channels c ON c.id = m.channel_id
              WHERE c.workspace_id = ?1
                AND (m.provider_thread_id IN ({0}) OR m.provider_message_id IN ({0}))",
            placeholders(2, chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let args = std::iter::once(workspace_id).chain(chunk.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (provider_thread_id, provider_message_id, thread_id) = row?;
            for key in [provider_thread_id, Some(provider_message_id)].into_iter().flatten() {
                if chunk.contains(&key) {
                    resolved.entry(key).or_insert_with(|| thread_id.clone());
                }
            }
        }
    }

    Ok(resolved)
}

/// Get-or-create keyed by (workspace, thread key). Safe under concurrent runs:
/// the insert is ignored on conflict and the surviving row is read back.
pub fn get_or_create_threads(
    pool: &DbPool,
    workspace_id: &str,
    keys: &[String],
) -> Result<Vec<ThreadWrite>, ImportError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().timestamp_millis();

    let mut writes = Vec::with_capacity(keys.len());

    for key in keys {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO message_threads (id, workspace_id, thread_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), workspace_id, key, now],
        );

        let write = match inserted {
            Ok(changed) => {
                let id = tx.query_row(
                    "SELECT id FROM message_threads WHERE workspace_id = ?1 AND thread_key = ?2",
                    params![workspace_id, key],
                    |row| row.get::<_, String>(0),
                );
                match id {
                    Ok(id) => ThreadWrite {
                        key: key.clone(),
                        thread_id: Some(id),
                        status: if changed == 1 { WriteStatus::Inserted } else { WriteStatus::AlreadyPresent },
                    },
                    Err(e) => ThreadWrite {
                        key: key.clone(),
                        thread_id: None,
                        status: WriteStatus::Failed(e.to_string()),
                    },
                }
            }
            Err(e) => ThreadWrite {
                key: key.clone(),
                thread_id: None,
                status: WriteStatus::Failed(e.to_string()),
            },
        };
        writes.push(write);
    }

    tx.commit()?;
    Ok(writes)
}

pub fn count_threads(pool: &DbPool, workspace_id: &str) -> Result<usize, ImportError> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM message_threads WHERE workspace_id = ?1",
        params![workspace_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
