pub mod memory;

pub use memory::MemoryIdentityProvider;

use std::future::Future;

use tokio::sync::watch;
use uuid::Uuid;

use crate::common::{AuthState, Identity, ProviderError};

/// Issues and remembers the anonymous identity of this installation.
pub trait IdentityProvider: Clone + Send + Sync + 'static {
    /// Identity of the current session, if one is already established.
    fn current_identity(&self) -> Option<Identity>;

    /// Session state notifications. The current value is `Pending` until a
    /// persisted session has been restored or found absent.
    fn auth_state(&self) -> watch::Receiver<AuthState>;

    /// Signs in anonymously. Returns the existing identity if a concurrent
    /// call already created one.
    fn create_anonymous_identity(
        &self,
    ) -> impl Future<Output = Result<Identity, ProviderError>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

pub fn new_anonymous_uid() -> String {
    Uuid::new_v4().simple().to_string()
}
