//! Persistence batcher
//!
//! Writes one page of assembled threads. Threads are get-or-create by key,
//! messages are idempotent upserts. Every input message ends up in exactly one
//! of `inserted`, `already_present` or `failed`.

use std::collections::HashMap;
use std::sync::Arc;

use super::store::{MessageStore, NewImportedMessage, WriteStatus};
use super::threads::AssembledThread;
use crate::error::Result;
use crate::types::{FailedMessage, MessageChannel, RawMessage};

#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub inserted: Vec<String>,
    pub already_present: Vec<String>,
    pub failed: Vec<FailedMessage>,
    pub threads_created: usize,
}

impl BatchReport {
    pub fn durable_count(&self) -> usize {
        self.inserted.len() + self.already_present.len()
    }

    pub fn accounted(&self) -> usize {
        self.durable_count() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    fn fail(&mut self, provider_message_id: String, reason: impl Into<String>) {
        self.failed.push(FailedMessage {
            provider_message_id,
            reason: reason.into(),
        });
    }
}

pub struct PersistenceBatcher {
    store: Arc<dyn MessageStore>,
}

impl PersistenceBatcher {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// An `Err` means the batch as a whole could not be written and nothing
    /// should be treated as durable.
    pub async fn persist(&self, channel: &MessageChannel, threads: Vec<AssembledThread>) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        let mut keys: Vec<String> = threads
            .iter()
            .filter(|t| t.existing_thread_id.is_none())
            .map(|t| t.key.clone())
            .collect();
        keys.sort();
        keys.dedup();

        let mut created: HashMap<String, std::result::Result<String, String>> = HashMap::new();
        if !keys.is_empty() {
            for write in self.store.get_or_create_threads(&channel.workspace_id, &keys).await? {
                let resolved = match (write.status, write.thread_id) {
                    (WriteStatus::Failed(reason), _) => Err(reason),
                    (status, Some(id)) => {
                        if status == WriteStatus::Inserted {
                            report.threads_created += 1;
                        }
                        Ok(id)
                    }
                    (_, None) => Err("store returned no thread id".to_string()),
                };
                created.insert(write.key, resolved);
            }
        }

        let mut rows = Vec::new();
        for thread in threads {
            let thread_id = match thread.existing_thread_id {
                Some(id) => Ok(id),
                None => created
                    .get(&thread.key)
                    .cloned()
                    .unwrap_or_else(|| Err("thread was not created".to_string())),
            };

            for msg in thread.messages {
                match &thread_id {
                    Ok(id) => rows.push(to_row(channel, id, msg)),
                    Err(reason) => report.fail(
                        msg.provider_message_id,
                        format!("thread {}: {}", thread.key, reason),
                    ),
                }
            }
        }

        if rows.is_empty() {
            return Ok(report);
        }

        let mut statuses: HashMap<String, WriteStatus> = self
            .store
            .upsert_messages(&rows)
            .await?
            .into_iter()
            .map(|w| (w.provider_message_id, w.status))
            .collect();

        for row in rows {
            let id = row.provider_message_id;
            match statuses.remove(&id) {
                Some(WriteStatus::Inserted) => report.inserted.push(id),
                Some(WriteStatus::AlreadyPresent) => report.already_present.push(id),
                Some(WriteStatus::Failed(reason)) => report.fail(id, reason),
                None => report.fail(id, "store reported no result"),
            }
        }

        Ok(report)
    }
}

fn to_row(channel: &MessageChannel, thread_id: &str, msg: RawMessage) -> NewImportedMessage {
    NewImportedMessage {
        channel_id: channel.id.clone(),
        provider_message_id: msg.provider_message_id,
        thread_id: thread_id.to_string(),
        provider_thread_id: msg.provider_thread_id,
        sent_at: msg.sent_at,
        subject: msg.subject,
        participants: msg.participants,
        attachments: msg.attachments,
        headers: msg.headers,
        body_ref: msg.body_ref,
    }
}
