//! Sync orchestrator
//!
//! Drives one import run over one channel:
//! fetch -> filter -> dedupe -> assemble -> persist -> commit cursor, page by page.
//!
//! - The channel is locked (Idle -> Running) for the whole run under a run token;
//!   cursor commits are fenced on that token.
//! - The durable cursor only moves after a page's writes are committed.
//! - Page-level failures are retried with backoff; the cursor does not move.
//! - Messages that fail individually are reported and the cursor still moves on.
//! - Cancellation is honored between pages.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dedup::Deduplicator;
use super::filters::FilterPipeline;
use super::persistence::{BatchReport, PersistenceBatcher};
use super::retry::RetryPolicy;
use super::store::{ChannelStore, MessageStore};
use super::threads::ThreadAssembler;
use crate::backend::MessageProvider;
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::services::blocklist::BlocklistLookup;
use crate::services::logger;
use crate::types::{
    ChannelSyncStatus, FailedMessage, MessageChannel, RunOutcome, SyncCursor, SyncRunReport,
};

/// Everything the orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn MessageProvider>,
    pub blocklist: Arc<dyn BlocklistLookup>,
    pub channels: Arc<dyn ChannelStore>,
    pub messages: Arc<dyn MessageStore>,
}

/// Cooperative cancellation, checked at page boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Notifications about run progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    RunStarted {
        channel_id: String,
        run_id: String,
    },
    PageCommitted {
        channel_id: String,
        page: u32,
        imported: u32,
        cursor: Option<SyncCursor>,
    },
    MessagesFailed {
        channel_id: String,
        failed: Vec<FailedMessage>,
    },
    RunFinished {
        channel_id: String,
        run_id: String,
        outcome: RunOutcome,
    },
}

/// Ephemeral state of one run
struct SyncRun {
    run_id: String,
    channel_id: String,
    start_cursor: Option<SyncCursor>,
    cursor: Option<SyncCursor>,
    pages: u32,
    seen: u32,
    filtered: u32,
    duplicates: u32,
    imported: u32,
    failed: Vec<FailedMessage>,
    started_at: chrono::DateTime<Utc>,
}

impl SyncRun {
    fn new(run_id: String, channel: &MessageChannel) -> Self {
        Self {
            run_id,
            channel_id: channel.id.clone(),
            start_cursor: channel.sync_cursor.clone(),
            cursor: channel.sync_cursor.clone(),
            pages: 0,
            seen: 0,
            filtered: 0,
            duplicates: 0,
            imported: 0,
            failed: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn record(&mut self, page: PageResult) {
        self.pages += 1;
        self.seen += page.seen as u32;
        self.filtered += page.filtered as u32;
        self.duplicates += (page.duplicates + page.report.already_present.len()) as u32;
        self.imported += page.report.inserted.len() as u32;
        self.failed.extend(page.report.failed);
        if page.next_cursor.is_some() {
            self.cursor = page.next_cursor;
        }
    }

    fn finish(self, outcome: RunOutcome, last_error: Option<String>) -> SyncRunReport {
        SyncRunReport {
            run_id: self.run_id,
            channel_id: self.channel_id,
            start_cursor: self.start_cursor,
            end_cursor: self.cursor,
            pages: self.pages,
            messages_seen: self.seen,
            messages_filtered: self.filtered,
            messages_duplicate: self.duplicates,
            messages_imported: self.imported,
            failed_messages: self.failed,
            outcome,
            last_error,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Result of one committed page
struct PageResult {
    next_cursor: Option<SyncCursor>,
    has_more: bool,
    seen: usize,
    filtered: usize,
    duplicates: usize,
    report: BatchReport,
}

pub struct SyncOrchestrator {
    provider: Arc<dyn MessageProvider>,
    channels: Arc<dyn ChannelStore>,
    pipeline: FilterPipeline,
    deduplicator: Deduplicator,
    assembler: ThreadAssembler,
    batcher: PersistenceBatcher,
    retry: RetryPolicy,
    page_size: usize,
    max_pages_per_run: Option<u32>,
    events: Option<flume::Sender<SyncEvent>>,
}

impl SyncOrchestrator {
    pub fn new(collaborators: Collaborators, config: &ImportConfig) -> Self {
        let pipeline = FilterPipeline::builder()
            .with_attachment_filter(&config.filters.blocked_attachment_extensions)
            .with_participant_filter(collaborators.blocklist.clone())
            .build();

        Self {
            provider: collaborators.provider,
            channels: collaborators.channels,
            pipeline,
            deduplicator: Deduplicator::new(collaborators.messages.clone()),
            assembler: ThreadAssembler::new(collaborators.messages.clone()),
            batcher: PersistenceBatcher::new(collaborators.messages),
            retry: RetryPolicy::from_config(&config.retry),
            page_size: config.sync.page_size,
            max_pages_per_run: config.sync.max_pages_per_run,
            events: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: FilterPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: flume::Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            // Nobody listening or listener lagging: drop rather than block the run
            if let Err(e) = tx.try_send(event) {
                debug!("Dropped sync event: {}", e);
            }
        }
    }

    /// Run one import pass. `Err` only when the run could not start;
    /// once started, every ending is reported through `SyncRunReport::outcome`.
    pub async fn run(&self, channel_id: &str, cancel: &CancelHandle) -> Result<SyncRunReport> {
        let channel = self.channels.load_channel(channel_id).await?;

        if channel.sync_status != ChannelSyncStatus::Idle {
            return Err(ImportError::RunRejected {
                channel_id: channel_id.to_string(),
                reason: format!("channel is {}", channel.sync_status),
            });
        }

        let run_id = Uuid::new_v4().to_string();
        if !self.channels.acquire_run(channel_id, &run_id).await? {
            return Err(ImportError::RunRejected {
                channel_id: channel_id.to_string(),
                reason: "another run holds the channel".into(),
            });
        }

        info!(channel_id, run_id = %run_id, "Starting import run");
        self.emit(SyncEvent::RunStarted {
            channel_id: channel_id.to_string(),
            run_id: run_id.clone(),
        });

        let mut run = SyncRun::new(run_id, &channel);
        let result = self.drive(&channel, &mut run, cancel).await;

        let (outcome, status, last_error) = match &result {
            Ok(()) if run.failed.is_empty() => (RunOutcome::Completed, ChannelSyncStatus::Idle, None),
            Ok(()) => (
                RunOutcome::PartiallyFailed,
                ChannelSyncStatus::Idle,
                Some(format!("{} message(s) failed to persist", run.failed.len())),
            ),
            Err(ImportError::Cancelled) => (RunOutcome::Cancelled, ChannelSyncStatus::Idle, None),
            Err(e) if e.requires_reconnect() => (RunOutcome::Failed, ChannelSyncStatus::Error, Some(e.to_string())),
            Err(e) => (RunOutcome::Failed, ChannelSyncStatus::Idle, Some(e.to_string())),
        };

        // A channel left Running blocks every later run; the report must say so
        let released = self
            .release(&channel.id, &run.run_id, status, last_error.as_deref())
            .await;
        let (outcome, last_error) = match released {
            Ok(()) => (outcome, last_error),
            Err(e) => {
                error!(channel_id = %channel.id, run_id = %run.run_id, "Failed to release channel: {}", e);
                let note = format!("channel lock not released: {}", e);
                let last_error = match last_error {
                    Some(prev) => format!("{}; {}", prev, note),
                    None => note,
                };
                (RunOutcome::Failed, Some(last_error))
            }
        };

        let report = run.finish(outcome, last_error);

        match report.outcome {
            RunOutcome::Completed => info!(
                "Import run for {} completed: {} page(s), {} imported, {} filtered, {} duplicate",
                report.channel_id, report.pages, report.messages_imported,
                report.messages_filtered, report.messages_duplicate
            ),
            RunOutcome::PartiallyFailed => warn!(
                "Import run for {} partially failed: {} imported, {} failed",
                report.channel_id, report.messages_imported, report.failed_messages.len()
            ),
            RunOutcome::Cancelled => info!(
                "Import run for {} cancelled after {} page(s)",
                report.channel_id, report.pages
            ),
            RunOutcome::Failed => error!(
                "Import run for {} failed: {}",
                report.channel_id,
                report.last_error.as_deref().unwrap_or("unknown error")
            ),
        }

        self.emit(SyncEvent::RunFinished {
            channel_id: report.channel_id.clone(),
            run_id: report.run_id.clone(),
            outcome: report.outcome,
        });

        Ok(report)
    }

    /// Release the run lock, retrying once unless the lock was lost to another run.
    async fn release(
        &self,
        channel_id: &str,
        run_token: &str,
        status: ChannelSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        match self.channels.release_run(channel_id, run_token, status, last_error).await {
            Ok(()) => Ok(()),
            Err(e @ ImportError::Fenced(_)) => Err(e),
            Err(e) => {
                warn!("Releasing channel {} failed, retrying once: {}", channel_id, e);
                self.channels.release_run(channel_id, run_token, status, last_error).await
            }
        }
    }

    async fn drive(&self, channel: &MessageChannel, run: &mut SyncRun, cancel: &CancelHandle) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            if let Some(max) = self.max_pages_per_run {
                if run.pages >= max {
                    info!("Page limit ({}) reached for channel {}, resuming next run", max, channel.id);
                    return Ok(());
                }
            }

            let previous = run.cursor.clone();
            let page = self.process_page_with_retry(channel, run, cancel).await?;
            let has_more = page.has_more;
            let next_cursor = page.next_cursor.clone();
            let imported = page.report.inserted.len() as u32;
            let failed = page.report.failed.clone();

            run.record(page);

            self.emit(SyncEvent::PageCommitted {
                channel_id: channel.id.clone(),
                page: run.pages,
                imported,
                cursor: run.cursor.clone(),
            });
            if !failed.is_empty() {
                warn!("{} message(s) failed to persist on page {} of channel {}", failed.len(), run.pages, channel.id);
                self.emit(SyncEvent::MessagesFailed {
                    channel_id: channel.id.clone(),
                    failed,
                });
            }

            if !has_more {
                return Ok(());
            }

            match next_cursor {
                None => {
                    warn!("Provider reported more pages without a cursor for channel {}", channel.id);
                    return Ok(());
                }
                Some(next) if Some(&next) == previous.as_ref() => {
                    warn!("Provider cursor did not advance for channel {}", channel.id);
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    async fn process_page_with_retry(
        &self,
        channel: &MessageChannel,
        run: &SyncRun,
        cancel: &CancelHandle,
    ) -> Result<PageResult> {
        let mut failures = 0u32;

        loop {
            match self.process_page(channel, run.cursor.as_ref(), &run.run_id).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    failures += 1;
                    let Some(delay) = self.retry.next_delay(failures, &e) else {
                        error!("Page of channel {} failed after {} attempt(s): {}", channel.id, failures, e);
                        return Err(e);
                    };

                    warn!(
                        "Page of channel {} failed (attempt {}), retrying in {}: {}",
                        channel.id, failures, logger::fmt_ms(delay), e
                    );
                    tokio::time::sleep(delay).await;

                    // Nothing from the failed attempt is committed; safe to stop here
                    if cancel.is_cancelled() {
                        return Err(ImportError::Cancelled);
                    }
                }
            }
        }
    }

    async fn process_page(
        &self,
        channel: &MessageChannel,
        cursor: Option<&SyncCursor>,
        run_token: &str,
    ) -> Result<PageResult> {
        let start = Instant::now();

        let page = self.provider.fetch_page(channel, cursor, self.page_size).await?;
        let seen = page.messages.len();

        let filtered = self.pipeline.run(channel, page.messages).await?;
        let dropped = filtered.dropped_total();
        for (stage, count) in &filtered.dropped {
            if *count > 0 {
                debug!("Filter {} dropped {} message(s) for channel {}", stage, count, channel.id);
            }
        }

        let dedup = self.deduplicator.partition(&channel.id, filtered.admitted).await?;
        let duplicates = dedup.duplicates.len();

        let threads = self.assembler.assemble(channel, dedup.fresh).await?;
        let report = self.batcher.persist(channel, threads).await?;

        // Writes are durable; only now may the cursor move
        if let Some(next) = &page.next_cursor {
            if Some(next) != cursor {
                self.channels.commit_cursor(&channel.id, run_token, next).await?;
            }
        }

        debug!(
            "Page for channel {}: {} seen, {} filtered, {} duplicate, {} imported, {} failed in {}",
            channel.id,
            seen,
            dropped,
            duplicates,
            report.inserted.len(),
            report.failed.len(),
            logger::fmt_ms(start.elapsed())
        );

        Ok(PageResult {
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            seen,
            filtered: dropped,
            duplicates,
            report,
        })
    }
}
