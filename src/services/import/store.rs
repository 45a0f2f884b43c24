//! Persistence seams used by the pipeline
//!
//! `ChannelStore` owns the per-channel run lock and cursor. `MessageStore` holds
//! threads and imported messages. The SQLite adapter implements both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::Result;
use crate::types::{Attachment, ChannelSyncStatus, MessageChannel, Participant, SyncCursor};

/// Result of writing one item inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Inserted,
    /// The row already existed; nothing changed
    AlreadyPresent,
    Failed(String),
}

impl WriteStatus {
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ThreadWrite {
    pub key: String,
    pub thread_id: Option<String>,
    pub status: WriteStatus,
}

#[derive(Debug, Clone)]
pub struct MessageWrite {
    pub provider_message_id: String,
    pub status: WriteStatus,
}

/// A message ready to be stored, already attached to a thread
#[derive(Debug, Clone)]
pub struct NewImportedMessage {
    pub channel_id: String,
    pub provider_message_id: String,
    pub thread_id: String,
    pub provider_thread_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub participants: Vec<Participant>,
    pub attachments: Vec<Attachment>,
    pub headers: BTreeMap<String, String>,
    pub body_ref: Option<String>,
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn load_channel(&self, channel_id: &str) -> Result<MessageChannel>;

    /// Move an idle, unheld channel to Running under `run_token`.
    ///
    /// Returns false when another run already holds it.
    async fn acquire_run(&self, channel_id: &str, run_token: &str) -> Result<bool>;

    /// Persist the cursor. Fails with `ImportError::Fenced` if `run_token`
    /// no longer holds the channel.
    async fn commit_cursor(
        &self,
        channel_id: &str,
        run_token: &str,
        cursor: &SyncCursor,
    ) -> Result<()>;

    /// Drop the run lock and record the resulting status.
    async fn release_run(
        &self,
        channel_id: &str,
        run_token: &str,
        status: ChannelSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Release Running locks taken before `started_before`. Returns how many.
    async fn release_stale_runs(&self, started_before: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Which of `provider_message_ids` are already imported for this channel
    async fn existing_message_ids(
        &self,
        channel_id: &str,
        provider_message_ids: &[String],
    ) -> Result<HashSet<String>>;

    /// Map thread keys / provider thread ids / provider message ids to the
    /// thread they already belong to in this workspace.
    async fn resolve_threads(
        &self,
        workspace_id: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Get-or-create one thread per key
    async fn get_or_create_threads(
        &self,
        workspace_id: &str,
        keys: &[String],
    ) -> Result<Vec<ThreadWrite>>;

    /// Idempotent insert; one `MessageWrite` per input. An `Err` means nothing
    /// in the batch was committed.
    async fn upsert_messages(&self, messages: &[NewImportedMessage]) -> Result<Vec<MessageWrite>>;
}
