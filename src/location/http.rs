use std::time::Duration;

use serde::Deserialize;

use crate::common::{Coords, LocationError};

use super::{Accuracy, LocationProvider, Permission};

pub const DEFAULT_LOOKUP_URL: &str = "http://ip-api.com/json";

/// Coarse position from an IP geolocation service.
///
/// Accepts any JSON body carrying `lat`/`lng`, `lat`/`lon` or
/// `latitude`/`longitude`.
pub struct HttpLocation {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "lon", alias = "longitude")]
    lng: f64,
}

impl HttpLocation {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl LocationProvider for HttpLocation {
    // Enabling the lookup in config is the user's consent.
    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn current_position(&self, accuracy: Accuracy) -> Result<Coords, LocationError> {
        log::debug!("Looking up position at {} ({accuracy:?})", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LocationError::Timeout
                } else {
                    LocationError::Unavailable(err.to_string())
                }
            })?
            .error_for_status()
            .map_err(|err| LocationError::Provider(err.to_string()))?;

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|err| LocationError::Provider(err.to_string()))?;
        parse_coords(body)
    }
}

fn parse_coords(body: LookupResponse) -> Result<Coords, LocationError> {
    let valid = body.lat.is_finite()
        && body.lng.is_finite()
        && (-90.0..=90.0).contains(&body.lat)
        && (-180.0..=180.0).contains(&body.lng);
    if !valid {
        return Err(LocationError::Provider(format!(
            "coordinates out of range: {}, {}",
            body.lat, body.lng
        )));
    }
    Ok(Coords {
        lat: body.lat,
        lng: body.lng,
    })
}
