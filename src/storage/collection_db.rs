use rusqlite::{Result as SqlResult, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::common::StoreError;

use super::database::Database;
use super::models::{Document, Fields, NewDocument, OrderBy};
use super::{CollectionStore, SnapshotResult, SnapshotStream};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Collection store backed by a SQLite file.
///
/// Commits made through this handle wake its subscribers directly. Commits made
/// by other connections to the same file are picked up by polling
/// `PRAGMA data_version` every `poll_interval`.
#[derive(Clone)]
pub struct SqliteCollectionStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: Mutex<Database>,
    changes: broadcast::Sender<String>,
    poll_interval: Duration,
}

impl SqliteCollectionStore {
    pub fn open<P: AsRef<Path>>(path: P, poll_interval: Duration) -> SqlResult<Self> {
        Self::from_database(Database::new(path)?, poll_interval)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::from_database(Database::in_memory()?, DEFAULT_POLL_INTERVAL)
    }

    fn from_database(db: Database, poll_interval: Duration) -> SqlResult<Self> {
        init_schema(&db)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                db: Mutex::new(db),
                changes,
                poll_interval,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.inner
            .db
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".to_string()))
    }

    fn insert_document(&self, collection: &str, document: NewDocument) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        {
            let mut db = self.lock()?;
            let tx = db
                .connection_mut()
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            // Commit times never go backwards, even if the wall clock does.
            let last: Option<i64> =
                tx.query_row("SELECT MAX(committed_at) FROM documents", [], |row| {
                    row.get(0)
                })?;
            let committed_at = Utc::now()
                .timestamp_millis()
                .max(last.unwrap_or(i64::MIN));

            let data = serde_json::to_string(&document.resolve(committed_at))?;
            tx.execute(
                "INSERT INTO documents (collection, id, data, committed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection, id, data, committed_at],
            )?;
            tx.commit()?;
        }

        // Nobody listening is fine.
        let _ = self.inner.changes.send(collection.to_string());
        Ok(id)
    }

    /// Current contents of `collection` in the requested order.
    pub fn query(&self, collection: &str, order_by: &OrderBy) -> Result<Vec<Document>, StoreError> {
        let path = order_by
            .json_path()
            .ok_or_else(|| StoreError::InvalidField(order_by.field.clone()))?;
        let direction = order_by.direction.as_sql();

        let rows = {
            let db = self.lock()?;
            let mut stmt = db.connection().prepare(&format!(
                "SELECT id, data
                 FROM documents
                 WHERE collection = ?1
                 ORDER BY json_extract(data, ?2) {direction}, seq {direction}"
            ))?;
            let rows = stmt
                .query_map(params![collection, path], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, data)| {
                Ok(Document {
                    id,
                    fields: serde_json::from_str::<Fields>(&data)?,
                })
            })
            .collect()
    }

    /// Get document count of a collection
    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let db = self.lock()?;
        let count: i64 = db.connection().query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn data_version(&self) -> Result<i64, StoreError> {
        Ok(self.lock()?.data_version()?)
    }

    /// Runs `op` on the blocking pool. A busy database can make a call wait up
    /// to the busy timeout, which must not hold up the async workers.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SqliteCollectionStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|err| StoreError::Unavailable(format!("task join error: {err}")))?
    }

    async fn run_subscription(
        self,
        collection: String,
        order_by: OrderBy,
        sender: mpsc::UnboundedSender<SnapshotResult>,
    ) {
        let mut changes = self.inner.changes.subscribe();
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut data_version = match self.blocking(Self::data_version).await {
            Ok(version) => version,
            Err(err) => {
                let _ = sender.send(Err(err));
                return;
            }
        };
        let mut last_snapshot: Option<Vec<Document>> = None;

        loop {
            let snapshot = {
                let collection = collection.clone();
                let order_by = order_by.clone();
                self.blocking(move |store| store.query(&collection, &order_by))
                    .await
            };
            match snapshot {
                Ok(snapshot) => {
                    // Foreign commits to other tables also bump data_version.
                    if last_snapshot.as_ref() != Some(&snapshot) {
                        if sender.send(Ok(snapshot.clone())).is_err() {
                            return;
                        }
                        last_snapshot = Some(snapshot);
                    }
                }
                Err(err) => {
                    let _ = sender.send(Err(err));
                    return;
                }
            }

            loop {
                tokio::select! {
                    _ = sender.closed() => return,
                    change = changes.recv() => match change {
                        Ok(name) if name == collection => break,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = ticker.tick() => match self.blocking(Self::data_version).await {
                        Ok(version) if version != data_version => {
                            data_version = version;
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            let _ = sender.send(Err(err));
                            return;
                        }
                    },
                }
            }
        }
    }
}

impl CollectionStore for SqliteCollectionStore {
    async fn insert(&self, collection: &str, document: NewDocument) -> Result<String, StoreError> {
        let collection = collection.to_string();
        self.blocking(move |store| store.insert_document(&collection, document))
            .await
    }

    /// Must be called from within a tokio runtime.
    fn subscribe(&self, collection: &str, order_by: OrderBy) -> SnapshotStream {
        let (sender, stream) = SnapshotStream::channel();
        let store = self.clone();
        let collection = collection.to_string();
        log::debug!(
            "Opening SQLite subscription on `{collection}` ordered by {}",
            order_by.field
        );
        tokio::spawn(store.run_subscription(collection, order_by, sender));
        stream
    }
}

fn init_schema(db: &Database) -> SqlResult<()> {
    let conn = db.connection();
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            id TEXT NOT NULL UNIQUE,
            data TEXT NOT NULL,
            committed_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::{Value, json};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn created_at(document: &Document) -> i64 {
        document.fields["createdAt"].as_i64().unwrap()
    }

    fn note(text: &str) -> NewDocument {
        NewDocument::new()
            .set("text", text)
            .set_server_timestamp("createdAt")
    }

    #[tokio::test]
    async fn insert_assigns_id_and_server_timestamp() {
        let store = SqliteCollectionStore::in_memory().unwrap();
        let before = Utc::now().timestamp_millis();
        let id = store.insert("notes", note("hello")).await.unwrap();

        let docs = store
            .query("notes", &OrderBy::descending("createdAt"))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(docs[0].fields["text"], json!("hello"));
        assert!(created_at(&docs[0]) >= before);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = SqliteCollectionStore::in_memory().unwrap();
        store.insert("a", note("one")).await.unwrap();
        store.insert("b", note("two")).await.unwrap();
        store.insert("b", note("three")).await.unwrap();

        assert_eq!(store.count("a").unwrap(), 1);
        assert_eq!(store.count("b").unwrap(), 2);
    }

    #[tokio::test]
    async fn descending_order_is_newest_first() {
        let store = SqliteCollectionStore::in_memory().unwrap();
        for text in ["first", "second", "third"] {
            store.insert("notes", note(text)).await.unwrap();
        }

        let docs = store
            .query("notes", &OrderBy::descending("createdAt"))
            .unwrap();
        let texts: Vec<_> = docs.iter().map(|d| d.fields["text"].clone()).collect();
        // Equal timestamps fall back to insertion order.
        assert_eq!(texts, [json!("third"), json!("second"), json!("first")]);
        for pair in docs.windows(2) {
            assert!(created_at(&pair[0]) >= created_at(&pair[1]));
        }
    }

    #[tokio::test]
    async fn null_fields_are_stored_as_null() {
        let store = SqliteCollectionStore::in_memory().unwrap();
        store
            .insert(
                "notes",
                NewDocument::new()
                    .set("message", Value::Null)
                    .set_server_timestamp("createdAt"),
            )
            .await
            .unwrap();

        let docs = store
            .query("notes", &OrderBy::ascending("createdAt"))
            .unwrap();
        assert_eq!(docs[0].fields.get("message"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn subscription_emits_initial_snapshot_and_updates() {
        let store = SqliteCollectionStore::in_memory().unwrap();
        let mut stream = store.subscribe("notes", OrderBy::descending("createdAt"));

        let initial = tokio::time::timeout(WAIT, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(initial.is_empty());

        store.insert("notes", note("hi")).await.unwrap();
        let update = tokio::time::timeout(WAIT, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].fields["text"], json!("hi"));
    }

    #[tokio::test]
    async fn invalid_order_field_ends_stream_with_error() {
        let store = SqliteCollectionStore::in_memory().unwrap();
        let mut stream = store.subscribe("notes", OrderBy::descending("bad field"));

        let first = tokio::time::timeout(WAIT, stream.next()).await.unwrap();
        assert!(matches!(first, Some(Err(StoreError::InvalidField(_)))));
        let end = tokio::time::timeout(WAIT, stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn observes_commits_from_another_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let reader = SqliteCollectionStore::open(&path, Duration::from_millis(20)).unwrap();
        let writer = SqliteCollectionStore::open(&path, Duration::from_millis(20)).unwrap();

        let mut stream = reader.subscribe("notes", OrderBy::descending("createdAt"));
        let initial = tokio::time::timeout(WAIT, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(initial.is_empty());

        let id = writer.insert("notes", note("from elsewhere")).await.unwrap();
        let update = tokio::time::timeout(WAIT, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].id, id);
    }

    #[tokio::test]
    async fn waiting_for_the_write_lock_keeps_the_runtime_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let store = SqliteCollectionStore::open(&path, DEFAULT_POLL_INTERVAL).unwrap();

        // Another writer holds the lock for a while.
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let holder = {
            let path = path.clone();
            std::thread::spawn(move || {
                let mut conn = rusqlite::Connection::open(&path).unwrap();
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
                tx.commit().unwrap();
            })
        };
        locked_rx.await.unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        store.insert("notes", note("queued")).await.unwrap();
        ticker.abort();
        holder.join().unwrap();

        let ticked = ticks.load(Ordering::SeqCst);
        assert!(ticked >= 5, "other tasks ticked only {ticked} times");
        assert_eq!(store.count("notes").unwrap(), 1);
    }

    #[tokio::test]
    async fn timestamps_never_decrease_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = SqliteCollectionStore::open(&path, DEFAULT_POLL_INTERVAL).unwrap();
        let b = SqliteCollectionStore::open(&path, DEFAULT_POLL_INTERVAL).unwrap();

        for i in 0..10 {
            let store = if i % 2 == 0 { &a } else { &b };
            store.insert("notes", note(&i.to_string())).await.unwrap();
        }

        let docs = a.query("notes", &OrderBy::ascending("createdAt")).unwrap();
        let texts: Vec<_> = docs.iter().map(|d| d.fields["text"].clone()).collect();
        let expected: Vec<_> = (0..10).map(|i| json!(i.to_string())).collect();
        assert_eq!(texts, expected);
    }
}
