use rusqlite::Connection;

use crate::error::ImportError;

pub fn initialize_schema(conn: &Connection) -> Result<(), ImportError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS message_channels (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            handle TEXT NOT NULL,
            provider TEXT NOT NULL,
            sync_cursor TEXT,
            sync_status TEXT NOT NULL DEFAULT 'idle',
            run_token TEXT,
            run_started_at INTEGER,
            last_error TEXT,
            last_run_at INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_channels_workspace ON message_channels(workspace_id);

        -- channel_id NULL means the entry applies to the whole workspace
        CREATE TABLE IF NOT EXISTS blocklist (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            channel_id TEXT,
            handle TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_blocklist_unique
            ON blocklist(workspace_id, IFNULL(channel_id, ''), handle);

        CREATE TABLE IF NOT EXISTS message_threads (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            thread_key TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(workspace_id, thread_key)
        );

        CREATE TABLE IF NOT EXISTS imported_messages (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES message_channels(id),
            provider_message_id TEXT NOT NULL,
            thread_id TEXT NOT NULL REFERENCES message_threads(id),
            provider_thread_id TEXT,
            sent_at INTEGER NOT NULL,
            subject TEXT,
            participants TEXT NOT NULL,   -- JSON
            attachments TEXT NOT NULL,    -- JSON
            headers TEXT NOT NULL,        -- JSON
            body_ref TEXT,
            imported_at INTEGER NOT NULL,
            UNIQUE(channel_id, provider_message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_imported_thread ON imported_messages(thread_id);
        CREATE INDEX IF NOT EXISTS idx_imported_provider_thread ON imported_messages(provider_thread_id);
        CREATE INDEX IF NOT EXISTS idx_imported_provider_message ON imported_messages(provider_message_id);
        ",
    )?;
    Ok(())
}
