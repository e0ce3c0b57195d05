//! IP → city lookup with a store-backed cache.
//!
//! The edge usually supplies the city itself; the lookup service is only
//! asked when it did not. Results are cached even when empty, so an IP the
//! service cannot place is not re-queried on every request. Anything that
//! does not parse as an IP address is never looked up or cached.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::GeoConfig;
use crate::store::{self, unix_now, Store};

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    city: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum LookupError {
    #[error("invalid geo endpoint '{0}'")]
    Endpoint(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct GeoResolver {
    client: reqwest::Client,
}

impl GeoResolver {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edge-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// City for `ip`; never fails, an unknown city is an empty string.
    pub async fn city(
        &self,
        config: &GeoConfig,
        store: &Arc<dyn Store>,
        ip: &str,
        edge_city: &str,
    ) -> String {
        if !edge_city.is_empty() {
            return edge_city.to_string();
        }
        if !config.enabled {
            return String::new();
        }
        let Ok(addr) = ip.trim().parse::<IpAddr>() else {
            if !ip.is_empty() {
                tracing::debug!(ip = %ip, "Skipping geo lookup for malformed IP");
            }
            return String::new();
        };
        let key = addr.to_string();

        let now = unix_now();
        let ttl = i64::try_from(config.ttl_secs).unwrap_or(i64::MAX);
        let cached = {
            let key = key.clone();
            store::blocking(store, move |s| s.get_geo(&key)).await
        };
        match cached {
            Ok(Some(cached)) if now.saturating_sub(cached.updated_at) < ttl => {
                return cached.city;
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(ip = %key, error = %e, "Geo cache read failed"),
        }

        let city = match self.lookup(config, addr).await {
            Ok(city) => city,
            Err(e) => {
                tracing::debug!(ip = %key, error = %e, "Geo lookup failed");
                String::new()
            }
        };

        let written = {
            let city = city.clone();
            let key = key.clone();
            store::blocking(store, move |s| s.put_geo(&key, &city, now)).await
        };
        if let Err(e) = written {
            tracing::debug!(ip = %key, error = %e, "Geo cache write failed");
        }
        city
    }

    async fn lookup(&self, config: &GeoConfig, ip: IpAddr) -> Result<String, LookupError> {
        let url = lookup_url(&config.endpoint, ip)?;
        let body: GeoResponse = self
            .client
            .get(url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.city.unwrap_or_default().trim().to_string())
    }
}

/// `{endpoint}/{ip}/json/`, with the IP pushed as a single path segment.
fn lookup_url(endpoint: &str, ip: IpAddr) -> Result<Url, LookupError> {
    let mut url = Url::parse(endpoint).map_err(|_| LookupError::Endpoint(endpoint.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| LookupError::Endpoint(endpoint.to_string()))?
        .pop_if_empty()
        .push(&ip.to_string())
        .push("json")
        .push("");
    Ok(url)
}
