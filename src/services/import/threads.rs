//! Thread assembly
//!
//! Messages are processed in ascending sent time so the earliest message of a
//! conversation establishes the thread the later ones join. Lookup order per
//! message: provider thread id, referenced message ids, then its own id; each
//! key is checked against threads formed earlier in the page before threads
//! already stored for the workspace. With no match the message seeds a thread
//! keyed by its provider thread id, or by its own id when it has none.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::store::MessageStore;
use crate::error::Result;
use crate::types::{MessageChannel, RawMessage};

#[derive(Debug, Clone)]
pub struct AssembledThread {
    /// Get-or-create key when the thread is not stored yet
    pub key: String,
    pub existing_thread_id: Option<String>,
    pub messages: Vec<RawMessage>,
}

pub struct ThreadAssembler {
    store: Arc<dyn MessageStore>,
}

impl ThreadAssembler {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn assemble(&self, channel: &MessageChannel, messages: Vec<RawMessage>) -> Result<Vec<AssembledThread>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let keys: Vec<String> = messages
            .iter()
            .flat_map(lookup_keys)
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect();

        let existing = self.store.resolve_threads(&channel.workspace_id, &keys).await?;
        Ok(group(messages, &existing))
    }
}

fn lookup_keys(msg: &RawMessage) -> impl Iterator<Item = &String> {
    msg.provider_thread_id
        .iter()
        .chain(msg.references.iter())
        .chain(std::iter::once(&msg.provider_message_id))
}

/// Group a page given the keys already known to the store.
pub(crate) fn group(mut messages: Vec<RawMessage>, existing: &HashMap<String, String>) -> Vec<AssembledThread> {
    messages.sort_by(|a, b| {
        a.sent_at
            .cmp(&b.sent_at)
            .then_with(|| a.provider_message_id.cmp(&b.provider_message_id))
    });

    let mut threads: Vec<AssembledThread> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut by_existing: HashMap<String, usize> = HashMap::new();

    for msg in messages {
        let mut target = None;

        for key in lookup_keys(&msg) {
            if let Some(&idx) = by_key.get(key) {
                target = Some(idx);
                break;
            }
            if let Some(thread_id) = existing.get(key) {
                let idx = *by_existing.entry(thread_id.clone()).or_insert_with(|| {
                    threads.push(AssembledThread {
                        key: key.clone(),
                        existing_thread_id: Some(thread_id.clone()),
                        messages: Vec::new(),
                    });
                    threads.len() - 1
                });
                target = Some(idx);
                break;
            }
        }

        let idx = target.unwrap_or_else(|| {
            let key = msg
                .provider_thread_id
                .clone()
                .unwrap_or_else(|| msg.provider_message_id.clone());
            threads.push(AssembledThread {
                key,
                existing_thread_id: None,
                messages: Vec::new(),
            });
            threads.len() - 1
        });

        for key in lookup_keys(&msg) {
            by_key.entry(key.clone()).or_insert(idx);
        }
        threads[idx].messages.push(msg);
    }

    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::import::testing::{channel, message, seeded_store};

    fn thread_of<'a>(threads: &'a [AssembledThread], id: &str) -> &'a AssembledThread {
        threads
            .iter()
            .find(|t| t.messages.iter().any(|m| m.provider_message_id == id))
            .expect("message not assembled")
    }

    #[test]
    fn test_shared_thread_id_groups_regardless_of_order() {
        let a = message("a", 10).with_thread("t1");
        let b = message("b", 5).with_thread("t1");
        let c = message("c", 7).with_thread("t2");

        for batch in [vec![a.clone(), b.clone(), c.clone()], vec![c.clone(), a.clone(), b.clone()]] {
            let threads = group(batch, &HashMap::new());
            assert_eq!(threads.len(), 2);
            let t1 = thread_of(&threads, "a");
            assert_eq!(t1.key, "t1");
            assert!(t1.messages.iter().any(|m| m.provider_message_id == "b"));
            assert_eq!(t1.messages[0].provider_message_id, "b");
        }
    }

    #[test]
    fn test_earlier_message_establishes_thread() {
        // A replies to B; B has no prior thread
        let b = message("B", 1);
        let a = message("A", 2).with_reference("B");

        for batch in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            let threads = group(batch, &HashMap::new());
            assert_eq!(threads.len(), 1);
            assert_eq!(threads[0].key, "B");
            let order: Vec<_> = threads[0].messages.iter().map(|m| m.provider_message_id.as_str()).collect();
            assert_eq!(order, vec!["B", "A"]);
        }
    }

    #[test]
    fn test_unreferenced_messages_are_singletons() {
        let threads = group(vec![message("m1", 1), message("m2", 1)], &HashMap::new());
        assert_eq!(threads.len(), 2);
        assert_eq!(thread_of(&threads, "m1").key, "m1");
        assert_eq!(thread_of(&threads, "m2").key, "m2");
    }

    #[test]
    fn test_existing_thread_is_joined() {
        let existing = HashMap::from([("t1".to_string(), "thread-1".to_string())]);
        let threads = group(
            vec![message("a", 1).with_thread("t1"), message("b", 2).with_reference("a")],
            &existing,
        );
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].existing_thread_id.as_deref(), Some("thread-1"));
        assert_eq!(threads[0].messages.len(), 2);
    }

    #[test]
    fn test_reference_joins_thread_with_other_thread_id() {
        // b carries its own provider thread id but replies into a stored thread;
        // c shares b's thread id and must land in the same place
        let existing = HashMap::from([("old".to_string(), "thread-1".to_string())]);
        let threads = group(
            vec![
                message("b", 1).with_thread("t9").with_reference("old"),
                message("c", 2).with_thread("t9"),
            ],
            &existing,
        );
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].existing_thread_id.as_deref(), Some("thread-1"));
    }

    #[tokio::test]
    async fn test_assemble_resolves_against_store() {
        let (store, thread_id) = seeded_store(&["m1"]);
        let assembler = ThreadAssembler::new(store);

        let threads = assembler
            .assemble(&channel("c1"), vec![message("m2", 5).with_reference("m1")])
            .await
            .unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].existing_thread_id.as_deref(), Some(thread_id.as_str()));
    }
}
