use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    From,
    To,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub handle: String,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
}

impl Participant {
    pub fn new(handle: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            handle: handle.into(),
            display_name: None,
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_ref: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_ref: None,
        }
    }
}

/// A message as yielded by the provider for one page.
///
/// Lives only for one pipeline pass; the persisted form is `ImportedMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub provider_message_id: String,
    /// Provider conversation id (Gmail threadId, Graph conversationId, ...)
    pub provider_thread_id: Option<String>,
    /// Provider ids of messages this one replies to or references
    #[serde(default)]
    pub references: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub subject: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body_ref: Option<String>,
}

impl RawMessage {
    pub fn new(provider_message_id: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            provider_message_id: provider_message_id.into(),
            provider_thread_id: None,
            references: Vec::new(),
            sent_at,
            subject: None,
            participants: Vec::new(),
            attachments: Vec::new(),
            headers: BTreeMap::new(),
            body_ref: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.provider_thread_id = Some(thread_id.into());
        self
    }

    pub fn with_reference(mut self, provider_message_id: impl Into<String>) -> Self {
        self.references.push(provider_message_id.into());
        self
    }

    pub fn with_participant(mut self, handle: impl Into<String>, role: ParticipantRole) -> Self {
        self.participants.push(Participant::new(handle, role));
        self
    }

    pub fn with_attachment(mut self, filename: impl Into<String>) -> Self {
        self.attachments.push(Attachment::new(filename));
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Persisted CRM record for one provider message.
///
/// Unique on (channel_id, provider_message_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportedMessage {
    pub id: String,
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
    pub imported_at: DateTime<Utc>,
}
