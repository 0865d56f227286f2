use std::time::Duration;

use rusqlite::Result as SqlResult;

use crate::auth::IdentityProvider;
use crate::common::{AuthState, Coords, Identity, LocationError, Ping, PingError};
use crate::config::AppConfig;
use crate::location::{Accuracy, LocationProvider, LocationSource, Permission};
use crate::storage::{CollectionStore, SqliteCollectionStore, SqliteIdentityProvider};

use super::backoff::RetryPolicy;
use super::record::{PINGS_COLLECTION, ping_document};
use super::subscription::{PingFeed, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Upper bound for the whole best-effort location step.
    pub location_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            location_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Data-access context for the ping feed: identity, writes and live reads.
///
/// Constructed once at startup and handed to whatever needs it.
pub struct PingClient<I, S, L> {
    identity: I,
    store: S,
    location: L,
    settings: ClientSettings,
}

pub type SqlitePingClient = PingClient<SqliteIdentityProvider, SqliteCollectionStore, LocationSource>;

impl SqlitePingClient {
    /// Opens the database named in `config`; its directory must exist.
    pub fn from_config(config: &AppConfig) -> SqlResult<Self> {
        let path = &config.store.database_path;
        let identity = SqliteIdentityProvider::open(path)?;
        let store = SqliteCollectionStore::open(path, config.store.poll_interval())?;
        let location = LocationSource::from_config(&config.location);
        Ok(PingClient::new(identity, store, location).with_settings(config.client_settings()))
    }
}

impl<I, S, L> PingClient<I, S, L>
where
    I: IdentityProvider,
    S: CollectionStore,
    L: LocationProvider,
{
    pub fn new(identity: I, store: S, location: L) -> Self {
        Self {
            identity,
            store,
            location,
            settings: ClientSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn identity_provider(&self) -> &I {
        &self.identity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the session identity, signing in anonymously if there is none.
    pub async fn ensure_identity(&self) -> Result<Identity, PingError> {
        if let Some(identity) = self.identity.current_identity() {
            return Ok(identity);
        }

        let mut state = self.identity.auth_state();
        let resolved: AuthState = {
            let current = state
                .wait_for(AuthState::is_resolved)
                .await
                .map_err(|_| PingError::AuthUnavailable("identity provider shut down".to_string()))?;
            (*current).clone()
        };

        if let AuthState::SignedIn(identity) = resolved {
            return Ok(identity);
        }

        self.identity
            .create_anonymous_identity()
            .await
            .map_err(|err| {
                log::error!("Anonymous sign-in failed: {err}");
                PingError::AuthUnavailable(err.to_string())
            })
    }

    pub async fn sign_out(&self) -> Result<(), PingError> {
        self.identity
            .sign_out()
            .await
            .map_err(|err| PingError::AuthUnavailable(err.to_string()))
    }

    /// Appends a ping and returns its id. Location is attached when it can be
    /// had within the configured timeout; only the write itself can fail.
    pub async fn create_ping(
        &self,
        identity: &Identity,
        message: Option<&str>,
    ) -> Result<String, PingError> {
        if identity.uid().is_empty() {
            return Err(PingError::AuthUnavailable("identity has an empty uid".to_string()));
        }

        let coords = self.acquire_location().await;
        let document = ping_document(identity, message, coords);

        match self.store.insert(PINGS_COLLECTION, document).await {
            Ok(id) => {
                log::info!(
                    "Created ping {id} for {identity} ({})",
                    if coords.is_some() { "with location" } else { "no location" }
                );
                Ok(id)
            }
            Err(err) => {
                log::error!("Error creating ping: {err}");
                Err(PingError::WriteFailed(err))
            }
        }
    }

    /// One-shot position, or `None` for any failure.
    pub async fn acquire_location(&self) -> Option<Coords> {
        let lookup = async {
            match self.location.request_permission().await {
                Permission::Granted => self.location.current_position(Accuracy::Balanced).await,
                Permission::Denied => Err(LocationError::PermissionDenied),
            }
        };

        let result = tokio::time::timeout(self.settings.location_timeout, lookup)
            .await
            .unwrap_or(Err(LocationError::Timeout));

        match result {
            Ok(coords) => Some(coords),
            Err(err) => {
                log::warn!("Location failed: {err}");
                None
            }
        }
    }

    /// Live feed as a stream of full snapshots, newest first.
    pub fn watch_pings(&self) -> PingFeed {
        PingFeed::spawn(self.store.clone(), self.settings.retry)
    }

    /// Calls `on_update` with the full ordered list now and after every change
    /// until the returned handle is unsubscribed or dropped.
    pub fn subscribe_to_pings<F>(&self, on_update: F) -> Subscription
    where
        F: FnMut(Vec<Ping>) + Send + 'static,
    {
        Subscription::spawn(self.watch_pings(), on_update)
    }
}
