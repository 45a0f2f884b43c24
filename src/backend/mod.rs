//! Mailbox provider seam
//!
//! Gmail/Graph/IMAP adapters live outside this crate and implement
//! `MessageProvider`. Authentication and transport are their concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{MessageChannel, RawMessage, SyncCursor};

/// One page of messages from the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderPage {
    pub messages: Vec<RawMessage>,
    /// Cursor to resume from once this page is committed
    pub next_cursor: Option<SyncCursor>,
    pub has_more: bool,
}

#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Fetch the page that follows `cursor` (`None` = from the beginning).
    ///
    /// Pages may overlap across calls. Failures are reported as
    /// `ImportError::Provider` with a transient or permanent kind.
    async fn fetch_page(
        &self,
        channel: &MessageChannel,
        cursor: Option<&SyncCursor>,
        page_size: usize,
    ) -> Result<ProviderPage>;
}
