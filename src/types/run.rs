use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::SyncCursor;

/// Terminal outcome of one run over one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    /// Every page committed, but some messages failed to persist
    PartiallyFailed,
    Failed,
    /// Stopped at a page boundary on request
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub provider_message_id: String,
    pub reason: String,
}

/// What a run did, reported to the scheduler once it ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunReport {
    pub run_id: String,
    pub channel_id: String,
    pub start_cursor: Option<SyncCursor>,
    /// Last durably committed cursor
    pub end_cursor: Option<SyncCursor>,
    pub pages: u32,
    pub messages_seen: u32,
    pub messages_filtered: u32,
    pub messages_duplicate: u32,
    pub messages_imported: u32,
    pub failed_messages: Vec<FailedMessage>,
    pub outcome: RunOutcome,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
