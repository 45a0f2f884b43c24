//! Test fixtures shared by the import pipeline tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::orchestrator::Collaborators;
use super::store::{
    ChannelStore, MessageStore, MessageWrite, NewImportedMessage, ThreadWrite, WriteStatus,
};
use crate::adapters::sqlite::{channels, messages, threads, SqliteBlocklist, SqliteStore};
use crate::backend::{MessageProvider, ProviderPage};
use crate::error::{ImportError, Result};
use crate::services::blocklist::{is_handle_blocklisted, normalize_handle, BlocklistLookup};
use crate::types::{ChannelSyncStatus, MessageChannel, NewChannel, RawMessage, SyncCursor};

pub const CHANNEL_HANDLE: &str = "me@corp.com";

fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn channel(id: &str) -> MessageChannel {
    MessageChannel {
        id: id.to_string(),
        workspace_id: "w1".to_string(),
        handle: CHANNEL_HANDLE.to_string(),
        provider: "google".to_string(),
        sync_cursor: None,
        sync_status: ChannelSyncStatus::Idle,
        last_error: None,
        last_run_at: None,
    }
}

pub fn message(id: &str, secs: i64) -> RawMessage {
    RawMessage::new(id, base_time() + Duration::seconds(secs))
}

/// In-memory store with channels c1, c2 (workspace w1) and `imported` already
/// stored on c1 in one thread. Returns the store and that thread's id (empty
/// when nothing was seeded).
pub fn seeded_store(imported: &[&str]) -> (Arc<SqliteStore>, String) {
    let store = SqliteStore::in_memory().unwrap();

    for id in ["c1", "c2"] {
        channels::register_channel(
            store.pool(),
            &NewChannel {
                id: id.to_string(),
                workspace_id: "w1".to_string(),
                handle: CHANNEL_HANDLE.to_string(),
                provider: "google".to_string(),
            },
        )
        .unwrap();
    }

    if imported.is_empty() {
        return (Arc::new(store), String::new());
    }

    let seed = threads::get_or_create_threads(store.pool(), "w1", &["seed".to_string()]).unwrap();
    let thread_id = seed[0].thread_id.clone().unwrap();

    let rows: Vec<NewImportedMessage> = imported
        .iter()
        .enumerate()
        .map(|(i, id)| NewImportedMessage {
            channel_id: "c1".to_string(),
            provider_message_id: id.to_string(),
            thread_id: thread_id.clone(),
            provider_thread_id: None,
            sent_at: base_time() - Duration::hours(1) + Duration::seconds(i as i64),
            subject: None,
            participants: Vec::new(),
            attachments: Vec::new(),
            headers: Default::default(),
            body_ref: None,
        })
        .collect();
    messages::insert_messages(store.pool(), &rows).unwrap();

    (Arc::new(store), thread_id)
}

pub fn collaborators(store: &Arc<SqliteStore>, provider: Arc<dyn MessageProvider>) -> Collaborators {
    Collaborators {
        provider,
        blocklist: Arc::new(SqliteBlocklist::new(store.pool().clone())),
        channels: store.clone(),
        messages: store.clone(),
    }
}

/// Blocklist with fixed entries, evaluated against `CHANNEL_HANDLE`
pub struct StaticBlocklist {
    entries: Vec<String>,
    failures_left: AtomicU32,
    pub calls: AtomicUsize,
}

impl StaticBlocklist {
    pub fn new(entries: &[&str]) -> Self {
        Self {
            entries: entries.iter().map(|e| normalize_handle(e)).collect(),
            failures_left: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` lookups with `ImportError::Lookup`
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    fn check_available(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ImportError::Lookup("blocklist unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlocklistLookup for StaticBlocklist {
    async fn is_blocklisted(&self, _channel_id: &str, handle: &str) -> Result<bool> {
        self.check_available()?;
        Ok(is_handle_blocklisted(CHANNEL_HANDLE, handle, &self.entries))
    }

    async fn blocklisted_handles(&self, _channel_id: &str, handles: &[String]) -> Result<HashSet<String>> {
        self.check_available()?;
        Ok(handles
            .iter()
            .filter(|h| is_handle_blocklisted(CHANNEL_HANDLE, h, &self.entries))
            .map(|h| normalize_handle(h))
            .collect())
    }
}

pub struct FailingBlocklist;

#[async_trait]
impl BlocklistLookup for FailingBlocklist {
    async fn is_blocklisted(&self, _channel_id: &str, _handle: &str) -> Result<bool> {
        Err(ImportError::Lookup("blocklist unavailable".into()))
    }
}

/// Message store that injects write failures in front of a real store
pub struct FlakyStore {
    inner: Arc<SqliteStore>,
    failing_ids: HashSet<String>,
    skip_batches: AtomicU32,
    failing_batches: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            failing_ids: HashSet::new(),
            skip_batches: AtomicU32::new(0),
            failing_batches: AtomicU32::new(0),
        }
    }

    /// These messages always fail individually
    pub fn failing_messages(mut self, ids: &[&str]) -> Self {
        self.failing_ids = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// The next `n` message batches fail as a whole
    pub fn failing_batches(self, n: u32) -> Self {
        self.failing_batches.store(n, Ordering::SeqCst);
        self
    }

    /// Let `skip` batches through, then fail the following `n`
    pub fn fail_batches_after(&self, skip: u32, n: u32) {
        self.skip_batches.store(skip, Ordering::SeqCst);
        self.failing_batches.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn existing_message_ids(&self, channel_id: &str, provider_message_ids: &[String]) -> Result<HashSet<String>> {
        self.inner.existing_message_ids(channel_id, provider_message_ids).await
    }

    async fn resolve_threads(&self, workspace_id: &str, keys: &[String]) -> Result<HashMap<String, String>> {
        self.inner.resolve_threads(workspace_id, keys).await
    }

    async fn get_or_create_threads(&self, workspace_id: &str, keys: &[String]) -> Result<Vec<ThreadWrite>> {
        self.inner.get_or_create_threads(workspace_id, keys).await
    }

    async fn upsert_messages(&self, batch: &[NewImportedMessage]) -> Result<Vec<MessageWrite>> {
        if !Self::take(&self.skip_batches) && Self::take(&self.failing_batches) {
            return Err(ImportError::Persistence("injected batch failure".into()));
        }

        let (failing, passing): (Vec<_>, Vec<_>) = batch
            .iter()
            .cloned()
            .partition(|m| self.failing_ids.contains(&m.provider_message_id));

        let mut writes = self.inner.upsert_messages(&passing).await?;
        writes.extend(failing.into_iter().map(|m| MessageWrite {
            provider_message_id: m.provider_message_id,
            status: WriteStatus::Failed("injected failure".into()),
        }));
        Ok(writes)
    }
}

/// Channel store whose `release_run` fails before reaching the real store
pub struct FlakyChannels {
    inner: Arc<SqliteStore>,
    failing_releases: AtomicU32,
}

impl FlakyChannels {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            failing_releases: AtomicU32::new(0),
        }
    }

    pub fn failing_releases(self, n: u32) -> Self {
        self.failing_releases.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl ChannelStore for FlakyChannels {
    async fn load_channel(&self, channel_id: &str) -> Result<MessageChannel> {
        self.inner.load_channel(channel_id).await
    }

    async fn acquire_run(&self, channel_id: &str, run_token: &str) -> Result<bool> {
        self.inner.acquire_run(channel_id, run_token).await
    }

    async fn commit_cursor(&self, channel_id: &str, run_token: &str, cursor: &SyncCursor) -> Result<()> {
        self.inner.commit_cursor(channel_id, run_token, cursor).await
    }

    async fn release_run(
        &self,
        channel_id: &str,
        run_token: &str,
        status: ChannelSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        if FlakyStore::take(&self.failing_releases) {
            return Err(ImportError::Database("database is locked".into()));
        }
        self.inner.release_run(channel_id, run_token, status, last_error).await
    }

    async fn release_stale_runs(&self, started_before: DateTime<Utc>) -> Result<usize> {
        self.inner.release_stale_runs(started_before).await
    }
}

/// Provider serving canned pages keyed by cursor
#[derive(Default)]
pub struct ScriptedProvider {
    pages: HashMap<String, ProviderPage>,
    failures: Mutex<HashMap<String, VecDeque<ImportError>>>,
    fetches: Mutex<Vec<Option<String>>>,
    delay: Option<std::time::Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

fn cursor_key(cursor: Option<&str>) -> String {
    cursor.unwrap_or_default().to_string()
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(
        mut self,
        cursor: Option<&str>,
        messages: Vec<RawMessage>,
        next: Option<&str>,
        has_more: bool,
    ) -> Self {
        self.pages.insert(
            cursor_key(cursor),
            ProviderPage {
                messages,
                next_cursor: next.map(SyncCursor::new),
                has_more,
            },
        );
        self
    }

    /// Fail the next fetch at `cursor` with `error` (queued, one per call)
    pub fn fail(self, cursor: Option<&str>, error: ImportError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(cursor_key(cursor))
            .or_default()
            .push_back(error);
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches_of(&self, cursor: Option<&str>) -> usize {
        let key = cursor.map(str::to_string);
        self.fetches.lock().unwrap().iter().filter(|c| **c == key).count()
    }
}

#[async_trait]
impl MessageProvider for ScriptedProvider {
    async fn fetch_page(
        &self,
        _channel: &MessageChannel,
        cursor: Option<&SyncCursor>,
        _page_size: usize,
    ) -> Result<ProviderPage> {
        let key = cursor_key(cursor.map(SyncCursor::as_str));
        self.fetches.lock().unwrap().push(cursor.map(|c| c.as_str().to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let injected = self.failures.lock().unwrap().get_mut(&key).and_then(VecDeque::pop_front);
        if let Some(err) = injected {
            return Err(err);
        }
        Ok(self.pages.get(&key).cloned().unwrap_or_default())
    }
}
