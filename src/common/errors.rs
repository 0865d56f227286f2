use thiserror::Error;

/// Failures reported by a collection store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("malformed document: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("cannot order by field `{0}`")]
    InvalidField(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// Failures reported by an identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("anonymous sign-in rejected: {0}")]
    Rejected(String),
}

/// Failures of the best-effort location lookup. Never surfaced past the access layer.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location request timed out")]
    Timeout,
    #[error("location provider error: {0}")]
    Provider(String),
}

/// Errors surfaced to callers of the ping access layer.
#[derive(Debug, Error)]
pub enum PingError {
    #[error("identity unavailable: {0}")]
    AuthUnavailable(String),
    #[error("failed to write ping: {0}")]
    WriteFailed(#[source] StoreError),
}
