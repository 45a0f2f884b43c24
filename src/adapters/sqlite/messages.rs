use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use super::channels::from_millis;
use super::threads::{placeholders, CHUNK_SIZE};
use super::DbPool;
use crate::error::ImportError;
use crate::services::import::store::{MessageWrite, NewImportedMessage, WriteStatus};
use crate::types::ImportedMessage;

pub fn existing_message_ids(
    pool: &DbPool,
    channel_id: &str,
    provider_message_ids: &[String],
) -> Result<HashSet<String>, ImportError> {
    let conn = pool.get()?;
    let mut existing = HashSet::new();

    for chunk in provider_message_ids.chunks(CHUNK_SIZE) {
        let sql = format!(
            "SELECT provider_message_id FROM imported_messages
              WHERE channel_id = ?1 AND provider_message_id IN ({})",
            placeholders(2, chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let args = std::iter::once(channel_id).chain(chunk.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;
        for row in rows {
            existing.insert(row?);
        }
    }

    Ok(existing)
}

fn insert_one(tx: &rusqlite::Transaction<'_>, msg: &NewImportedMessage, now: i64) -> Result<usize, ImportError> {
    let participants = serde_json::to_string(&msg.participants)?;
    let attachments = serde_json::to_string(&msg.attachments)?;
    let headers = serde_json::to_string(&msg.headers)?;

    let changed = tx.execute(
        "INSERT INTO imported_messages (
            id, channel_id, provider_message_id, thread_id, provider_thread_id,
            sent_at, subject, participants, attachments, headers, body_ref, imported_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(channel_id, provider_message_id) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            msg.channel_id,
            msg.provider_message_id,
            msg.thread_id,
            msg.provider_thread_id,
            msg.sent_at.timestamp_millis(),
            msg.subject,
            participants,
            attachments,
            headers,
            msg.body_ref,
            now,
        ],
    )?;
    Ok(changed)
}

/// Insert a batch in one transaction. A failing row is reported and skipped;
/// the rest of the batch still commits.
pub fn insert_messages(pool: &DbPool, messages: &[NewImportedMessage]) -> Result<Vec<MessageWrite>, ImportError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().timestamp_millis();

    let mut writes = Vec::with_capacity(messages.len());

    for msg in messages {
        let status = match insert_one(&tx, msg, now) {
            Ok(1) => WriteStatus::Inserted,
            Ok(_) => WriteStatus::AlreadyPresent,
            Err(e) => {
                warn!("Failed to insert message {}: {}", msg.provider_message_id, e);
                WriteStatus::Failed(e.to_string())
            }
        };
        writes.push(MessageWrite {
            provider_message_id: msg.provider_message_id.clone(),
            status,
        });
    }

    tx.commit()?;
    Ok(writes)
}

pub fn get_imported_message(
    pool: &DbPool,
    channel_id: &str,
    provider_message_id: &str,
) -> Result<Option<ImportedMessage>, ImportError> {
    let conn = pool.get()?;
    let row = conn
        .query_row(
            "SELECT id, channel_id, provider_message_id, thread_id, provider_thread_id,
                    sent_at, subject, participants, attachments, headers, body_ref, imported_at
               FROM imported_messages
              WHERE channel_id = ?1 AND provider_message_id = ?2",
            params![channel_id, provider_message_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, i64>(11)?,
                ))
            },
        )
        .optional()?;

    let Some((id, channel_id, provider_message_id, thread_id, provider_thread_id, sent_at, subject, participants, attachments, headers, body_ref, imported_at)) = row else {
        return Ok(None);
    };

    Ok(Some(ImportedMessage {
        id,
        channel_id,
        provider_message_id,
        thread_id,
        provider_thread_id,
        sent_at: from_millis(sent_at),
        subject,
        participants: serde_json::from_str(&participants)?,
        attachments: serde_json::from_str(&attachments)?,
        headers: serde_json::from_str(&headers)?,
        body_ref,
        imported_at: from_millis(imported_at),
    }))
}

pub fn count_messages(pool: &DbPool, channel_id: &str) -> Result<usize, ImportError> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM imported_messages WHERE channel_id = ?1",
        params![channel_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
