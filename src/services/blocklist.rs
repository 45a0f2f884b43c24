//! Blocklist lookup
//!
//! Read-only view of the workspace blocklist. A lookup that fails must surface
//! the error: callers treat it as "cannot decide", never as "not blocklisted".

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;

#[async_trait]
pub trait BlocklistLookup: Send + Sync {
    /// Is `handle` blocklisted for this channel (workspace entries included)?
    async fn is_blocklisted(&self, channel_id: &str, handle: &str) -> Result<bool>;

    /// Resolve a batch of handles, returning the normalized handles that are blocklisted.
    async fn blocklisted_handles(
        &self,
        channel_id: &str,
        handles: &[String],
    ) -> Result<HashSet<String>> {
        let mut blocked = HashSet::new();
        for handle in handles {
            if self.is_blocklisted(channel_id, handle).await? {
                blocked.insert(normalize_handle(handle));
            }
        }
        Ok(blocked)
    }
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().to_lowercase()
}

/// Does a single blocklist entry match `handle`?
///
/// Entries starting with `@` match the domain and its subdomains,
/// anything else must equal the handle.
pub fn entry_matches(entry: &str, handle: &str) -> bool {
    let entry = normalize_handle(entry);
    let handle = normalize_handle(handle);

    if let Some(domain) = entry.strip_prefix('@') {
        let Some((_, handle_domain)) = handle.rsplit_once('@') else {
            return false;
        };
        return handle_domain == domain || handle_domain.ends_with(&format!(".{}", domain));
    }

    entry == handle
}

/// Apply the blocklist rules for a channel whose own address is `channel_handle`.
pub fn is_handle_blocklisted(channel_handle: &str, handle: &str, entries: &[String]) -> bool {
    let normalized = normalize_handle(handle);
    if normalized.is_empty() || normalized == normalize_handle(channel_handle) {
        return false;
    }
    entries.iter().any(|entry| entry_matches(entry, &normalized))
}
