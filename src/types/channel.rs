use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque provider pagination token.
///
/// Stored and handed back verbatim; never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted sync status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSyncStatus {
    Idle,
    Running,
    /// Provider rejected the account; needs reconnection before the next run.
    Error,
}

impl ChannelSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "error" => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for ChannelSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected mailbox belonging to a workspace member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageChannel {
    pub id: String,
    pub workspace_id: String,
    /// The mailbox's own address
    pub handle: String,
    pub provider: String,
    pub sync_cursor: Option<SyncCursor>,
    pub sync_status: ChannelSyncStatus,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Input for registering a channel
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub id: String,
    pub workspace_id: String,
    pub handle: String,
    pub provider: String,
}
