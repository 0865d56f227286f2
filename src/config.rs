use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::feed::{ClientSettings, RetryPolicy};
use crate::location::http::DEFAULT_LOOKUP_URL;

pub const DEFAULT_CONFIG_PATH: &str = "config/ping_feed.json";
pub const DEFAULT_DATABASE_PATH: &str = "data/ping_feed.db";

const DATABASE_ENV: &str = "PING_FEED_DB";
const LOCATION_URL_ENV: &str = "PING_FEED_LOCATION_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub location: LocationConfig,
    pub subscription: SubscriptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: String,
    /// How often live feeds check for commits made by other processes.
    pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl StoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationProviderKind {
    #[default]
    None,
    Fixed,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub provider: LocationProviderKind,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub lookup_url: String,
    pub timeout_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: LocationProviderKind::None,
            lat: None,
            lng: None,
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl LocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl AppConfig {
    pub fn client_settings(&self) -> ClientSettings {
        let initial = Duration::from_millis(self.subscription.retry_initial_ms.max(1));
        let max = Duration::from_millis(self.subscription.retry_max_ms).max(initial);
        ClientSettings {
            location_timeout: self.location.timeout(),
            retry: RetryPolicy { initial, max },
        }
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            if !path.trim().is_empty() {
                self.store.database_path = path;
            }
        }
        if let Ok(url) = std::env::var(LOCATION_URL_ENV) {
            if !url.trim().is_empty() {
                self.location.lookup_url = url;
            }
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    crate::storage::ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
