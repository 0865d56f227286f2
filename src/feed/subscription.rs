use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::Ping;
use crate::storage::{CollectionStore, OrderBy};

use super::backoff::{Backoff, RetryPolicy};
use super::record::{CREATED_AT_FIELD, PINGS_COLLECTION, pings_from_snapshot};

/// Live, newest-first view of the ping collection.
///
/// Yields the complete list on subscription and after every change. Store
/// errors never reach the consumer: they are logged, the last list stays
/// current, and the subscription is re-opened with backoff.
pub struct PingFeed {
    receiver: mpsc::UnboundedReceiver<Vec<Ping>>,
    task: Option<JoinHandle<()>>,
}

impl PingFeed {
    pub(crate) fn spawn<S: CollectionStore>(store: S, retry: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_feed(store, retry, sender));
        Self {
            receiver,
            task: Some(task),
        }
    }

    /// Stops the feed. Nothing is yielded afterwards, including snapshots
    /// already buffered. Calling it again does nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.receiver.close();
            log::debug!("Ping feed unsubscribed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Stream for PingFeed {
    type Item = Vec<Ping>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.task.is_none() {
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

impl Drop for PingFeed {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_feed<S: CollectionStore>(
    store: S,
    retry: RetryPolicy,
    sender: mpsc::UnboundedSender<Vec<Ping>>,
) {
    let mut backoff = Backoff::new(retry);
    loop {
        let mut snapshots = store.subscribe(PINGS_COLLECTION, OrderBy::descending(CREATED_AT_FIELD));
        log::info!("Listening to `{PINGS_COLLECTION}`");

        loop {
            tokio::select! {
                _ = sender.closed() => return,
                next = snapshots.next() => match next {
                    Some(Ok(documents)) => {
                        backoff.reset();
                        if sender.send(pings_from_snapshot(documents)).is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        log::warn!("Error listening to pings: {err}");
                        break;
                    }
                    None => {
                        log::warn!("Ping subscription closed by the store");
                        break;
                    }
                },
            }
        }

        let delay = backoff.next_delay();
        log::info!("Re-subscribing to `{PINGS_COLLECTION}` in {delay:?}");
        tokio::select! {
            _ = sender.closed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

type Listener = Box<dyn FnMut(Vec<Ping>) + Send>;

enum ListenerSlot {
    Idle(Listener),
    /// Taken out by an invocation in progress.
    Running,
    Closed,
}

/// Callback-driven subscription handle returned by
/// [`PingClient::subscribe_to_pings`](super::PingClient::subscribe_to_pings).
pub struct Subscription {
    listener: Arc<Mutex<ListenerSlot>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(mut feed: PingFeed, on_update: F) -> Self
    where
        F: FnMut(Vec<Ping>) + Send + 'static,
    {
        let on_update: Listener = Box::new(on_update);
        let listener = Arc::new(Mutex::new(ListenerSlot::Idle(on_update)));
        let shared = Arc::clone(&listener);
        let task = tokio::spawn(async move {
            while let Some(pings) = feed.next().await {
                if !deliver(&shared, pings) {
                    break;
                }
            }
        });
        Self {
            listener,
            task: Some(task),
        }
    }

    /// Detaches the callback. No invocation starts after this returns. It may
    /// be called from inside the callback itself. Idempotent.
    pub fn unsubscribe(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _detached = std::mem::replace(
            &mut *self.listener.lock().unwrap_or_else(PoisonError::into_inner),
            ListenerSlot::Closed,
        );
        task.abort();
        log::debug!("Ping subscription closed");
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Runs the callback without holding the lock. Returns false once closed.
fn deliver(listener: &Mutex<ListenerSlot>, pings: Vec<Ping>) -> bool {
    let mut on_update = {
        let mut slot = listener.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, ListenerSlot::Running) {
            ListenerSlot::Idle(on_update) => on_update,
            other => {
                *slot = other;
                return false;
            }
        }
    };

    on_update(pings);

    let mut slot = listener.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(*slot, ListenerSlot::Running) {
        *slot = ListenerSlot::Idle(on_update);
        true
    } else {
        false
    }
}
