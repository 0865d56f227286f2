pub mod http;

pub use http::HttpLocation;

use std::future::Future;

use crate::common::{Coords, LocationError};
use crate::config::{LocationConfig, LocationProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Accuracy hint for a one-shot position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accuracy {
    Lowest,
    Low,
    #[default]
    Balanced,
    High,
}

/// Device location capability. Every call may fail; callers treat the
/// result as optional.
pub trait LocationProvider: Send + Sync + 'static {
    fn request_permission(&self) -> impl Future<Output = Permission> + Send;

    fn current_position(
        &self,
        accuracy: Accuracy,
    ) -> impl Future<Output = Result<Coords, LocationError>> + Send;
}

/// Location capability that is always denied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    async fn request_permission(&self) -> Permission {
        Permission::Denied
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Coords, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}

/// Reports configured coordinates; denied when none are set.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation {
    coords: Option<Coords>,
}

impl FixedLocation {
    pub fn at(coords: Coords) -> Self {
        Self {
            coords: Some(coords),
        }
    }

    pub fn denied() -> Self {
        Self { coords: None }
    }
}

impl LocationProvider for FixedLocation {
    async fn request_permission(&self) -> Permission {
        if self.coords.is_some() {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Coords, LocationError> {
        self.coords.ok_or(LocationError::PermissionDenied)
    }
}

/// Location provider chosen by configuration.
pub enum LocationSource {
    Disabled(NoLocation),
    Fixed(FixedLocation),
    Http(HttpLocation),
}

impl LocationSource {
    pub fn from_config(config: &LocationConfig) -> Self {
        match config.provider {
            LocationProviderKind::None => LocationSource::Disabled(NoLocation),
            LocationProviderKind::Fixed => match (config.lat, config.lng) {
                (Some(lat), Some(lng)) => LocationSource::Fixed(FixedLocation::at(Coords { lat, lng })),
                _ => {
                    log::warn!("Fixed location selected without lat/lng; location disabled");
                    LocationSource::Fixed(FixedLocation::denied())
                }
            },
            LocationProviderKind::Http => {
                match HttpLocation::new(&config.lookup_url, config.timeout()) {
                    Ok(provider) => LocationSource::Http(provider),
                    Err(err) => {
                        log::warn!("Unable to build location client: {err}; location disabled");
                        LocationSource::Disabled(NoLocation)
                    }
                }
            }
        }
    }
}

impl LocationProvider for LocationSource {
    async fn request_permission(&self) -> Permission {
        match self {
            LocationSource::Disabled(provider) => provider.request_permission().await,
            LocationSource::Fixed(provider) => provider.request_permission().await,
            LocationSource::Http(provider) => provider.request_permission().await,
        }
    }

    async fn current_position(&self, accuracy: Accuracy) -> Result<Coords, LocationError> {
        match self {
            LocationSource::Disabled(provider) => provider.current_position(accuracy).await,
            LocationSource::Fixed(provider) => provider.current_position(accuracy).await,
            LocationSource::Http(provider) => provider.current_position(accuracy).await,
        }
    }
}
