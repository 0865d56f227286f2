//! Shared live ping feed: anonymous identity, best-effort location, and a
//! newest-first subscription over an append-only collection.

pub mod auth;
pub mod common;
pub mod config;
pub mod feed;
pub mod location;
pub mod storage;
pub mod ui;

pub use common::{AuthState, Coords, Identity, Ping, PingError};
pub use feed::{PingClient, PingFeed, SqlitePingClient, Subscription};
