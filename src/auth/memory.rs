use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::common::{AuthState, Identity, ProviderError};

use super::{IdentityProvider, new_anonymous_uid};

/// Process-local identity provider. Sessions do not survive a restart.
#[derive(Clone)]
pub struct MemoryIdentityProvider {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<AuthState>,
    failures: AtomicUsize,
    offline: AtomicBool,
    created: AtomicUsize,
}

impl MemoryIdentityProvider {
    /// Provider with no session.
    pub fn new() -> Self {
        Self::with_state(AuthState::SignedOut)
    }

    /// Provider that is still restoring its session; see [`Self::resolve`].
    pub fn pending() -> Self {
        Self::with_state(AuthState::Pending)
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self::with_state(AuthState::SignedIn(identity))
    }

    fn with_state(state: AuthState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            inner: Arc::new(Inner {
                state,
                failures: AtomicUsize::new(0),
                offline: AtomicBool::new(false),
                created: AtomicUsize::new(0),
            }),
        }
    }

    /// Finishes session restoration with the given outcome.
    pub fn resolve(&self, identity: Option<Identity>) {
        self.inner.state.send_replace(match identity {
            Some(identity) => AuthState::SignedIn(identity),
            None => AuthState::SignedOut,
        });
    }

    /// Rejects the next `count` anonymous sign-ins.
    pub fn fail_next_creations(&self, count: usize) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    /// While offline every sign-in fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of identities this provider has issued.
    pub fn creation_count(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity().cloned()
    }

    fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    async fn create_anonymous_identity(&self) -> Result<Identity, ProviderError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("network unreachable".to_string()));
        }
        if self.take_failure() {
            return Err(ProviderError::Rejected("sign-in refused".to_string()));
        }

        let mut issued = None;
        let fresh = self.inner.state.send_if_modified(|state| match state {
            AuthState::SignedIn(identity) => {
                issued = Some(identity.clone());
                false
            }
            _ => {
                let identity = Identity::new(new_anonymous_uid());
                issued = Some(identity.clone());
                *state = AuthState::SignedIn(identity);
                true
            }
        });

        match issued {
            Some(identity) => {
                if fresh {
                    self.inner.created.fetch_add(1, Ordering::SeqCst);
                }
                Ok(identity)
            }
            None => Err(ProviderError::Unavailable("session state lost".to_string())),
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.inner.state.send_replace(AuthState::SignedOut);
        Ok(())
    }
}
