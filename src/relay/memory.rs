use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::{ConversationStore, RelayError, Subscription};
use crate::conversation::DocumentKey;

type Document = Option<serde_json::Value>;

/// In-process relay
///
/// Both parties may share a single `MemoryRelay` (it's cheap to clone). Every write is
/// immediately observable by all subscribers of the document.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    documents: Arc<Mutex<HashMap<DocumentKey, watch::Sender<Document>>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active subscriptions to the document
    pub fn subscribers(&self, key: &DocumentKey) -> usize {
        self.lock()
            .get(key)
            .map(|doc| doc.receiver_count())
            .unwrap_or(0)
    }

    /// Overwrites the document synchronously
    pub fn put(&self, key: &DocumentKey, document: serde_json::Value) {
        self.lock()
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(document));
    }

    /// Latest version of the document
    pub fn get(&self, key: &DocumentKey) -> Document {
        self.lock().get(key).and_then(|doc| doc.borrow().clone())
    }

    fn lock(&self) -> MutexGuard<HashMap<DocumentKey, watch::Sender<Document>>> {
        // The map is never left in inconsistent state, so a poisoned lock is still usable
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConversationStore for MemoryRelay {
    async fn write(
        &self,
        key: &DocumentKey,
        document: serde_json::Value,
        _expect_reply: bool,
    ) -> Result<(), RelayError> {
        tracing::trace!(%key, "write document");
        self.put(key, document);
        Ok(())
    }

    async fn read(&self, key: &DocumentKey) -> Result<Document, RelayError> {
        Ok(self.get(key))
    }

    async fn subscribe(&self, key: &DocumentKey) -> Result<Subscription, RelayError> {
        let receiver = self
            .lock()
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        Ok(WatchStream::new(receiver)
            .filter_map(|doc| async move { doc.map(Ok) })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::conversation::Collection;

    #[tokio::test]
    async fn subscriber_sees_existing_version_then_changes() {
        let relay = MemoryRelay::new();
        let key = DocumentKey::new(Collection::Keygen, "p1");
        relay.write(&key, json!({"v": 1}), false).await.unwrap();

        let mut sub = relay.subscribe(&key).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), json!({"v": 1}));

        relay.write(&key, json!({"v": 2}), true).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), json!({"v": 2}));
        assert_eq!(relay.read(&key).await.unwrap(), Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn missing_document_yields_nothing_until_written() {
        let relay = MemoryRelay::new();
        let key = DocumentKey::new(Collection::Sign, "p1");
        let mut sub = relay.subscribe(&key).await.unwrap();

        let writer = relay.clone();
        let key2 = key.clone();
        tokio::spawn(async move { writer.write(&key2, json!("hi"), false).await });
        assert_eq!(sub.next().await.unwrap().unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let relay = MemoryRelay::new();
        let key = DocumentKey::new(Collection::Backup, "p1");
        let sub = relay.subscribe(&key).await.unwrap();
        assert_eq!(relay.subscribers(&key), 1);
        drop(sub);
        assert_eq!(relay.subscribers(&key), 0);
    }

    #[tokio::test]
    async fn documents_are_isolated_by_key() {
        let relay = MemoryRelay::new();
        let keygen = DocumentKey::new(Collection::Keygen, "p1");
        let sign = DocumentKey::new(Collection::Sign, "p1");
        relay.write(&keygen, json!(1), false).await.unwrap();
        assert_eq!(relay.read(&sign).await.unwrap(), None);
    }
}
