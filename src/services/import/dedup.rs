//! Deduplication against already imported messages
//!
//! Providers deliver at least once: pages overlap across retries and cursor
//! rewinds. One existence check per page classifies the batch; nothing is written.

use std::collections::HashSet;
use std::sync::Arc;

use super::store::MessageStore;
use crate::error::Result;
use crate::types::RawMessage;

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Not yet imported for this channel, first occurrence within the page
    pub fresh: Vec<RawMessage>,
    pub duplicates: Vec<RawMessage>,
}

pub struct Deduplicator {
    store: Arc<dyn MessageStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn partition(&self, channel_id: &str, batch: Vec<RawMessage>) -> Result<DedupOutcome> {
        if batch.is_empty() {
            return Ok(DedupOutcome::default());
        }

        let mut unique_ids: Vec<String> = Vec::with_capacity(batch.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());
        for msg in &batch {
            if seen.insert(msg.provider_message_id.as_str()) {
                unique_ids.push(msg.provider_message_id.clone());
            }
        }

        let existing = self.store.existing_message_ids(channel_id, &unique_ids).await?;
        Ok(split(batch, &existing))
    }
}

fn split(batch: Vec<RawMessage>, existing: &HashSet<String>) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut taken: HashSet<String> = HashSet::new();

    for msg in batch {
        if existing.contains(&msg.provider_message_id) || !taken.insert(msg.provider_message_id.clone()) {
            outcome.duplicates.push(msg);
        } else {
            outcome.fresh.push(msg);
        }
    }

    outcome
}
