pub mod collection_db;
pub mod database;
pub mod identity_db;
pub mod memory;
pub mod models;

pub use collection_db::SqliteCollectionStore;
pub use identity_db::SqliteIdentityProvider;
pub use memory::MemoryCollectionStore;
pub use models::{Direction, Document, FieldValue, NewDocument, OrderBy};

use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::common::StoreError;

pub type SnapshotResult = Result<Vec<Document>, StoreError>;

/// An ordered, appendable set of named collections with live snapshots.
pub trait CollectionStore: Clone + Send + Sync + 'static {
    /// Appends a document and returns its store-assigned id.
    fn insert(
        &self,
        collection: &str,
        document: NewDocument,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Streams the full ordered contents of `collection`, once immediately and
    /// again after every change. An error ends the stream. Dropping the stream
    /// cancels the subscription.
    fn subscribe(&self, collection: &str, order_by: OrderBy) -> SnapshotStream;
}

/// Receiving half of a live subscription.
pub struct SnapshotStream {
    receiver: mpsc::UnboundedReceiver<SnapshotResult>,
}

impl SnapshotStream {
    pub fn channel() -> (mpsc::UnboundedSender<SnapshotResult>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

impl Stream for SnapshotStream {
    type Item = SnapshotResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Ensure the directory holding `path` exists
pub fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
