use rusqlite::{OptionalExtension, Result as SqlResult, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;

use crate::auth::{IdentityProvider, new_anonymous_uid};
use crate::common::{AuthState, Identity, ProviderError};

use super::database::Database;

/// Anonymous identity persisted in a single-row SQLite table, so it survives
/// restarts of the client.
#[derive(Clone)]
pub struct SqliteIdentityProvider {
    inner: Arc<Inner>,
}

struct Inner {
    db: Mutex<Database>,
    state: watch::Sender<AuthState>,
}

impl SqliteIdentityProvider {
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::from_database(Database::new(path)?)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::from_database(Database::in_memory()?)
    }

    fn from_database(db: Database) -> SqlResult<Self> {
        init_schema(&db)?;
        let state = match load_identity(&db)? {
            Some(identity) => {
                log::info!("Restored anonymous session {identity}");
                AuthState::SignedIn(identity)
            }
            None => AuthState::SignedOut,
        };
        let (state, _) = watch::channel(state);
        Ok(Self {
            inner: Arc::new(Inner {
                db: Mutex::new(db),
                state,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, ProviderError> {
        self.inner
            .db
            .lock()
            .map_err(|_| ProviderError::Unavailable("database lock poisoned".to_string()))
    }

    /// Unix seconds at which the stored identity was issued.
    pub fn issued_at(&self) -> Result<Option<i64>, ProviderError> {
        let db = self.lock()?;
        let issued_at = db
            .connection()
            .query_row("SELECT created_at FROM identity WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(issued_at)
    }

    fn stored_identity(&self) -> Result<Option<Identity>, ProviderError> {
        let db = self.lock()?;
        Ok(load_identity(&db)?)
    }

    /// Updates the session state to match the stored row.
    fn publish(&self, stored: Option<Identity>) {
        let next = match stored {
            Some(identity) => AuthState::SignedIn(identity),
            None => AuthState::SignedOut,
        };
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce(&SqliteIdentityProvider) -> Result<T, ProviderError> + Send + 'static,
        T: Send + 'static,
    {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || op(&provider))
            .await
            .map_err(|err| ProviderError::Unavailable(format!("task join error: {err}")))?
    }
}

impl IdentityProvider for SqliteIdentityProvider {
    /// Reads the stored row, so a sign-out by another process is seen here.
    fn current_identity(&self) -> Option<Identity> {
        match self.stored_identity() {
            Ok(stored) => {
                self.publish(stored.clone());
                stored
            }
            Err(err) => {
                log::warn!("Could not read stored identity: {err}");
                self.inner.state.borrow().identity().cloned()
            }
        }
    }

    fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    async fn create_anonymous_identity(&self) -> Result<Identity, ProviderError> {
        let identity = self
            .blocking(|provider| {
                let db = provider.lock()?;
                // A concurrent caller or another process may have won the race.
                db.connection().execute(
                    "INSERT OR IGNORE INTO identity (id, uid, created_at) VALUES (1, ?1, ?2)",
                    params![new_anonymous_uid(), Utc::now().timestamp()],
                )?;
                Ok(load_identity(&db)?)
            })
            .await?
            .ok_or_else(|| ProviderError::Rejected("identity row missing after insert".to_string()))?;

        log::info!("Anonymous sign-in as {identity}");
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.blocking(|provider| {
            provider
                .lock()?
                .connection()
                .execute("DELETE FROM identity WHERE id = 1", [])?;
            Ok(())
        })
        .await?;
        self.publish(None);
        log::info!("Signed out");
        Ok(())
    }
}

fn init_schema(db: &Database) -> SqlResult<()> {
    // Identity table (single row)
    db.connection().execute(
        "CREATE TABLE IF NOT EXISTS identity (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            uid TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;
    Ok(())
}

fn load_identity(db: &Database) -> SqlResult<Option<Identity>> {
    db.connection()
        .query_row("SELECT uid FROM identity WHERE id = 1", [], |row| {
            Ok(Identity::new(row.get::<_, String>(0)?))
        })
        .optional()
}
