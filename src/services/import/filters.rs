//! Admission filters
//!
//! Each filter is an independent predicate over a batch; a message is admitted
//! only if it passes every stage. Local filters run before filters that need a
//! lookup so fewer handles reach the blocklist.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::services::blocklist::{normalize_handle, BlocklistLookup};
use crate::types::{MessageChannel, RawMessage};

#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Filters that call out to a collaborator run after purely local ones.
    fn requires_lookup(&self) -> bool {
        false
    }

    async fn apply(&self, channel: &MessageChannel, batch: Vec<RawMessage>) -> Result<Vec<RawMessage>>;
}

/// Drops messages carrying an attachment with a blocked extension (calendar invites).
pub struct AttachmentFilter {
    blocked_extensions: Vec<String>,
}

impl AttachmentFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked_extensions = extensions
            .into_iter()
            .map(|ext| {
                let ext = ext.as_ref().trim();
                if ext.starts_with('.') { ext.to_string() } else { format!(".{}", ext) }
            })
            .collect();
        Self { blocked_extensions }
    }

    /// Suffix match, case-sensitive (`invite.ICS` is not a `.ics` attachment)
    fn is_blocked(&self, filename: &str) -> bool {
        self.blocked_extensions.iter().any(|ext| filename.ends_with(ext.as_str()))
    }
}

#[async_trait]
impl Filter for AttachmentFilter {
    fn name(&self) -> &'static str {
        "attachment"
    }

    async fn apply(&self, _channel: &MessageChannel, batch: Vec<RawMessage>) -> Result<Vec<RawMessage>> {
        Ok(batch
            .into_iter()
            .filter(|msg| !msg.attachments.iter().any(|a| self.is_blocked(&a.filename)))
            .collect())
    }
}

/// Drops a whole message when any participant is blocklisted for the channel.
pub struct ParticipantFilter {
    lookup: Arc<dyn BlocklistLookup>,
}

impl ParticipantFilter {
    pub fn new(lookup: Arc<dyn BlocklistLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl Filter for ParticipantFilter {
    fn name(&self) -> &'static str {
        "participant"
    }

    fn requires_lookup(&self) -> bool {
        true
    }

    async fn apply(&self, channel: &MessageChannel, batch: Vec<RawMessage>) -> Result<Vec<RawMessage>> {
        let mut seen = HashSet::new();
        let handles: Vec<String> = batch
            .iter()
            .flat_map(|msg| msg.participants.iter())
            .map(|p| normalize_handle(&p.handle))
            .filter(|h| !h.is_empty() && seen.insert(h.clone()))
            .collect();

        if handles.is_empty() {
            return Ok(batch);
        }

        // One lookup per batch; an error fails the whole batch
        let blocked = self.lookup.blocklisted_handles(&channel.id, &handles).await?;

        Ok(batch
            .into_iter()
            .filter(|msg| {
                !msg.participants
                    .iter()
                    .any(|p| blocked.contains(&normalize_handle(&p.handle)))
            })
            .collect())
    }
}

/// Admitted messages plus how many each stage dropped
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub admitted: Vec<RawMessage>,
    pub dropped: Vec<(&'static str, usize)>,
}

impl FilterOutcome {
    pub fn dropped_total(&self) -> usize {
        self.dropped.iter().map(|(_, n)| n).sum()
    }
}

pub struct FilterPipeline {
    stages: Vec<Box<dyn Filter>>,
}

impl FilterPipeline {
    pub fn builder() -> FilterPipelineBuilder {
        FilterPipelineBuilder::default()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order. Any stage error fails the batch as a whole.
    pub async fn run(&self, channel: &MessageChannel, batch: Vec<RawMessage>) -> Result<FilterOutcome> {
        let mut current = batch;
        let mut dropped = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            if current.is_empty() {
                break;
            }
            let before = current.len();
            current = stage.apply(channel, current).await?;
            dropped.push((stage.name(), before.saturating_sub(current.len())));
        }

        Ok(FilterOutcome { admitted: current, dropped })
    }
}

#[derive(Default)]
pub struct FilterPipelineBuilder {
    local: Vec<Box<dyn Filter>>,
    lookup: Vec<Box<dyn Filter>>,
}

impl FilterPipelineBuilder {
    pub fn with_attachment_filter<I, S>(self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_filter(AttachmentFilter::new(extensions))
    }

    pub fn with_participant_filter(self, lookup: Arc<dyn BlocklistLookup>) -> Self {
        self.with_filter(ParticipantFilter::new(lookup))
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        if filter.requires_lookup() {
            self.lookup.push(Box::new(filter));
        } else {
            self.local.push(Box::new(filter));
        }
        self
    }

    pub fn build(self) -> FilterPipeline {
        let mut stages = self.local;
        stages.extend(self.lookup);
        FilterPipeline { stages }
    }
}
