//! Sync manager state
//!
//! Schedules import runs across channels: at most one run per channel, a global
//! limit on concurrent runs, cancellation by channel id and a shared event feed.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::adapters::sqlite::{SqliteBlocklist, SqliteStore};
use crate::backend::MessageProvider;
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::services::import::store::ChannelStore;
use crate::services::import::{CancelHandle, Collaborators, SyncEvent, SyncOrchestrator};
use crate::types::SyncRunReport;

const EVENT_BUFFER: usize = 256;

type RunningSet = Arc<Mutex<HashMap<String, CancelHandle>>>;

pub struct SyncManager {
    orchestrator: Arc<SyncOrchestrator>,
    channels: Arc<dyn ChannelStore>,
    limiter: Arc<Semaphore>,
    running: RunningSet,
    events_rx: flume::Receiver<SyncEvent>,
    stale_after: chrono::Duration,
}

/// Removes the channel from the running set however the run ends
struct RunningGuard {
    running: RunningSet,
    channel_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.channel_id);
    }
}

fn lock(running: &RunningSet) -> MutexGuard<'_, HashMap<String, CancelHandle>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SyncManager {
    pub fn new(collaborators: Collaborators, config: &ImportConfig) -> Self {
        let channels = collaborators.channels.clone();
        Self::from_parts(SyncOrchestrator::new(collaborators, config), channels, config)
    }

    /// Open the SQLite database at `config.database.path` and use it for
    /// channel state, imported messages and the blocklist.
    pub fn from_config(config: &ImportConfig, provider: Arc<dyn MessageProvider>) -> Result<Self> {
        info!("Opening import database at {:?}", config.database.path);
        let store = Arc::new(SqliteStore::open(&config.database.path)?);

        let collaborators = Collaborators {
            provider,
            blocklist: Arc::new(SqliteBlocklist::new(store.pool().clone())),
            channels: store.clone(),
            messages: store,
        };
        Ok(Self::new(collaborators, config))
    }

    /// Wrap a preconfigured orchestrator (custom filters or retry policy)
    pub fn from_parts(
        orchestrator: SyncOrchestrator,
        channels: Arc<dyn ChannelStore>,
        config: &ImportConfig,
    ) -> Self {
        let (tx, rx) = flume::bounded(EVENT_BUFFER);
        let permits = config.sync.max_concurrent_runs.max(1);

        info!("Sync manager ready ({} concurrent run(s))", permits);

        Self {
            orchestrator: Arc::new(orchestrator.with_events(tx)),
            channels,
            limiter: Arc::new(Semaphore::new(permits)),
            running: Arc::new(Mutex::new(HashMap::new())),
            events_rx: rx,
            stale_after: chrono::Duration::minutes(config.sync.stale_run_minutes),
        }
    }

    /// Receiver for run events. Receivers share one queue; each event is
    /// delivered to one of them.
    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        self.events_rx.clone()
    }

    pub fn is_running(&self, channel_id: &str) -> bool {
        lock(&self.running).contains_key(channel_id)
    }

    pub fn running_channels(&self) -> Vec<String> {
        lock(&self.running).keys().cloned().collect()
    }

    /// Run one channel, waiting for a free slot if the global limit is reached.
    ///
    /// Rejected immediately when the same channel is already queued or running.
    pub async fn run_channel(&self, channel_id: &str) -> Result<SyncRunReport> {
        let cancel = self.register(channel_id)?;
        let _guard = RunningGuard {
            running: self.running.clone(),
            channel_id: channel_id.to_string(),
        };

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ImportError::RunRejected {
                channel_id: channel_id.to_string(),
                reason: "sync manager is shut down".into(),
            })?;

        debug!("Slot acquired for channel {}", channel_id);
        self.orchestrator.run(channel_id, &cancel).await
    }

    /// Run several channels concurrently, bounded by the global limit.
    pub async fn run_channels(self: &Arc<Self>, channel_ids: Vec<String>) -> Vec<(String, Result<SyncRunReport>)> {
        let handles: Vec<_> = channel_ids
            .into_iter()
            .map(|channel_id| {
                let manager = Arc::clone(self);
                let id = channel_id.clone();
                (channel_id, tokio::spawn(async move { manager.run_channel(&id).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (channel_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ImportError::Other(format!("run task for {} failed: {}", channel_id, e))),
            };
            results.push((channel_id, result));
        }
        results
    }

    /// Request cancellation; the run stops at its next page boundary.
    pub fn cancel(&self, channel_id: &str) -> bool {
        match lock(&self.running).get(channel_id) {
            Some(handle) => {
                info!("Cancelling import run for channel {}", channel_id);
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting runs and cancel everything in flight
    pub fn shutdown(&self) {
        self.limiter.close();
        for (channel_id, handle) in lock(&self.running).iter() {
            debug!("Shutdown: cancelling {}", channel_id);
            handle.cancel();
        }
    }

    /// Release channels left Running by a crashed process.
    pub async fn recover_stale_runs(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.stale_after;
        let released = self.channels.release_stale_runs(cutoff).await?;
        if released > 0 {
            warn!("Released {} stale run lock(s) started before {}", released, cutoff);
        }
        Ok(released)
    }

    fn register(&self, channel_id: &str) -> Result<CancelHandle> {
        let mut running = lock(&self.running);
        if running.contains_key(channel_id) {
            return Err(ImportError::RunRejected {
                channel_id: channel_id.to_string(),
                reason: "a run is already in progress".into(),
            });
        }
        let handle = CancelHandle::new();
        running.insert(channel_id.to_string(), handle.clone());
        Ok(handle)
    }
}
