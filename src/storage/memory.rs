use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::common::StoreError;

use super::models::{Document, NewDocument, OrderBy};
use super::{CollectionStore, SnapshotResult, SnapshotStream};

/// In-process collection store.
///
/// Besides serving as an embedded backend it can simulate an unreliable
/// remote: failing inserts, a frozen clock and broken subscriptions.
#[derive(Clone, Default)]
pub struct MemoryCollectionStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_seq: i64,
    last_timestamp_ms: i64,
    frozen_clock_ms: Option<i64>,
    failing_inserts: usize,
    offline: bool,
    collections: HashMap<String, Vec<StoredDocument>>,
    subscribers: Vec<Subscriber>,
}

struct StoredDocument {
    seq: i64,
    document: Document,
}

struct Subscriber {
    collection: String,
    order_by: OrderBy,
    sender: mpsc::UnboundedSender<SnapshotResult>,
}

impl MemoryState {
    fn snapshot(&self, collection: &str, order_by: &OrderBy) -> Vec<Document> {
        let Some(stored) = self.collections.get(collection) else {
            return Vec::new();
        };
        let mut rows: Vec<_> = stored.iter().map(|s| (&s.document, s.seq)).collect();
        rows.sort_by(|a, b| order_by.compare(*a, *b));
        rows.into_iter().map(|(doc, _)| doc.clone()).collect()
    }

    fn notify(&mut self, collection: &str) {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.retain(|subscriber| {
            if subscriber.collection != collection {
                return !subscriber.sender.is_closed();
            }
            let snapshot = self.snapshot(collection, &subscriber.order_by);
            subscriber.sender.send(Ok(snapshot)).is_ok()
        });
        self.subscribers = subscribers;
    }

    fn next_timestamp(&mut self) -> i64 {
        let now = self
            .frozen_clock_ms
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        self.last_timestamp_ms = self.last_timestamp_ms.max(now);
        self.last_timestamp_ms
    }
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejects the next `count` inserts.
    pub fn fail_next_inserts(&self, count: usize) {
        self.lock().failing_inserts = count;
    }

    /// While offline every insert fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Pins the commit clock, or releases it with `None`.
    pub fn freeze_clock(&self, at_ms: Option<i64>) {
        self.lock().frozen_clock_ms = at_ms;
    }

    /// Terminates every live subscription on `collection` with an error.
    pub fn break_subscriptions(&self, collection: &str, reason: &str) {
        let mut state = self.lock();
        state.subscribers.retain(|subscriber| {
            if subscriber.collection != collection {
                return true;
            }
            let _ = subscriber
                .sender
                .send(Err(StoreError::Subscription(reason.to_string())));
            false
        });
    }

    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Number of subscriptions whose stream is still held by someone.
    pub fn active_subscriptions(&self, collection: &str) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.collection == collection && !s.sender.is_closed())
            .count()
    }

    pub fn documents(&self, collection: &str, order_by: &OrderBy) -> Vec<Document> {
        self.lock().snapshot(collection, order_by)
    }
}

impl CollectionStore for MemoryCollectionStore {
    async fn insert(&self, collection: &str, document: NewDocument) -> Result<String, StoreError> {
        let mut state = self.lock();
        if state.offline {
            return Err(StoreError::Unavailable("network unreachable".to_string()));
        }
        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(StoreError::Unavailable("insert rejected".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let committed_at = state.next_timestamp();
        state.next_seq += 1;
        let seq = state.next_seq;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredDocument {
                seq,
                document: Document {
                    id: id.clone(),
                    fields: document.resolve(committed_at),
                },
            });
        state.notify(collection);
        Ok(id)
    }

    fn subscribe(&self, collection: &str, order_by: OrderBy) -> SnapshotStream {
        let (sender, stream) = SnapshotStream::channel();
        let mut state = self.lock();
        let initial = state.snapshot(collection, &order_by);
        if sender.send(Ok(initial)).is_ok() {
            state.subscribers.push(Subscriber {
                collection: collection.to_string(),
                order_by,
                sender,
            });
        }
        stream
    }
}
