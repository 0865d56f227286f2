pub mod errors;
pub mod events;
pub mod types;

pub use errors::{LocationError, PingError, ProviderError, StoreError};
pub use events::AuthState;
pub use types::{Coords, Identity, MAX_MESSAGE_CHARS, Ping};
