pub mod backoff;
pub mod client;
pub mod record;
pub mod subscription;

pub use backoff::{Backoff, RetryPolicy};
pub use client::{ClientSettings, PingClient, SqlitePingClient};
pub use record::{CREATED_AT_FIELD, PINGS_COLLECTION};
pub use subscription::{PingFeed, Subscription};
