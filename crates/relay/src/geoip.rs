//! IP geolocation lookup with a short-lived per-address cache.
//!
//! The provider speaks the ip-api.com JSON dialect. Results for explicit
//! addresses are cached for the configured TTL; loopback callers resolve the
//! server's own public address and are never cached.

use std::{
    collections::HashMap,
    error::Error as StdError,
    future::Future,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use actix_web::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::GeoIpOptions;

const LOOKUP_FIELDS: &str = "status,country,city,lat,lon,isp";
const SELF_LOOKUP_FIELDS: &str = "status,country,city,lat,lon,isp,query";
const UNKNOWN: &str = "Unknown";

/// Resolved location returned by `/api/geo-ip`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub country: String,
    pub ip: String,
}

/// What to ask the provider about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupTarget<'a> {
    /// The server's own public address.
    SelfAddress,
    Address(&'a str),
}

#[derive(Debug, Error)]
pub enum GeoIpError {
    #[error("geolocation request failed")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
    #[error("geolocation response was not valid JSON")]
    Parse(#[from] serde_json::Error),
    #[error("geolocation provider could not resolve {target}")]
    Unresolved { target: String, self_lookup: bool },
}

impl GeoIpError {
    pub fn status(&self) -> StatusCode {
        match self {
            GeoIpError::Unresolved { .. } => StatusCode::BAD_REQUEST,
            GeoIpError::Transport(_) | GeoIpError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to HTTP clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            GeoIpError::Unresolved {
                self_lookup: true, ..
            } => "Unable to determine location",
            GeoIpError::Unresolved { .. } => "Unable to geocode IP",
            GeoIpError::Parse(_) => "Parse failed",
            GeoIpError::Transport(_) => "Geocoding failed",
        }
    }
}

/// Upstream geolocation source returning the raw JSON body.
pub trait GeoProvider: Send + Sync + 'static {
    fn fetch(
        &self,
        target: LookupTarget<'_>,
    ) -> impl Future<Output = Result<String, GeoIpError>> + Send;
}

/// ip-api.com compatible HTTP provider.
pub struct HttpGeoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeoIpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GeoIpError::Transport(Box::new(err)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, target: LookupTarget<'_>) -> String {
        match target {
            LookupTarget::SelfAddress => format!("{}/?fields={SELF_LOOKUP_FIELDS}", self.base_url),
            LookupTarget::Address(ip) => format!("{}/{ip}?fields={LOOKUP_FIELDS}", self.base_url),
        }
    }
}

impl GeoProvider for HttpGeoProvider {
    async fn fetch(&self, target: LookupTarget<'_>) -> Result<String, GeoIpError> {
        let url = self.url(target);
        debug!("Requesting {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| GeoIpError::Transport(Box::new(err)))?;
        response
            .text()
            .await
            .map_err(|err| GeoIpError::Transport(Box::new(err)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProviderReply {
    status: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    country: Option<String>,
    query: Option<String>,
}

fn parse_reply(body: &str, target: LookupTarget<'_>) -> Result<GeoLocation, GeoIpError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    // Non-numeric coordinates mean the provider could not resolve the address.
    let reply: ProviderReply = serde_json::from_value(value).unwrap_or_default();
    let (target_label, self_lookup) = match target {
        LookupTarget::SelfAddress => ("public address".to_string(), true),
        LookupTarget::Address(ip) => (ip.to_string(), false),
    };
    match (reply.status.as_deref(), reply.lat, reply.lon) {
        (Some("success"), Some(lat), Some(lng)) => Ok(GeoLocation {
            lat,
            lng,
            city: reply.city.unwrap_or_else(|| UNKNOWN.to_string()),
            country: reply.country.unwrap_or_else(|| UNKNOWN.to_string()),
            ip: match target {
                LookupTarget::SelfAddress => reply.query.unwrap_or_else(|| "unknown".to_string()),
                LookupTarget::Address(ip) => ip.to_string(),
            },
        }),
        _ => Err(GeoIpError::Unresolved {
            target: target_label,
            self_lookup,
        }),
    }
}

/// Whether the caller is on this host and must be resolved by public address.
pub fn is_loopback(address: &str) -> bool {
    matches!(address, "::1" | "127.0.0.1" | "localhost")
}

struct CacheEntry {
    location: GeoLocation,
    stored_at: Instant,
}

/// Per-address result cache with a fixed time-to-live.
pub struct GeoCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl GeoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, address: &str) -> Option<GeoLocation> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(address)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.location.clone())
    }

    pub fn insert(&self, address: &str, location: GeoLocation) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.insert(
            address.to_string(),
            CacheEntry {
                location,
                stored_at: Instant::now(),
            },
        );
    }
}

pub struct GeoIpService<P> {
    provider: P,
    cache: GeoCache,
}

impl GeoIpService<HttpGeoProvider> {
    pub fn from_options(options: &GeoIpOptions) -> Result<Self, GeoIpError> {
        let provider = HttpGeoProvider::new(options.provider_url.clone(), options.timeout)?;
        Ok(Self::new(provider, options.cache_ttl))
    }
}

impl<P: GeoProvider> GeoIpService<P> {
    pub fn new(provider: P, cache_ttl: Duration) -> Self {
        Self {
            provider,
            cache: GeoCache::new(cache_ttl),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Resolve the location of `client_ip`.
    pub async fn locate(&self, client_ip: &str) -> Result<GeoLocation, GeoIpError> {
        if let Some(location) = self.cache.get(client_ip) {
            info!("Using cached location for {client_ip}");
            metrics::counter!("tracklive_geoip_lookups_total", "source" => "cache").increment(1);
            return Ok(location);
        }

        metrics::counter!("tracklive_geoip_lookups_total", "source" => "provider").increment(1);
        let result = if is_loopback(client_ip) {
            info!("Localhost detected, resolving public address");
            self.lookup(LookupTarget::SelfAddress).await
        } else {
            info!("Geocoding IP: {client_ip}");
            let location = self.lookup(LookupTarget::Address(client_ip)).await;
            if let Ok(location) = &location {
                self.cache.insert(client_ip, location.clone());
            }
            location
        };

        if result.is_err() {
            metrics::counter!("tracklive_geoip_errors_total").increment(1);
        }
        result
    }

    async fn lookup(&self, target: LookupTarget<'_>) -> Result<GeoLocation, GeoIpError> {
        let body = self.provider.fetch(target).await?;
        parse_reply(&body, target)
    }
}


#[cfg(test)]
mod tests {
    use super::{
        fake::{FakeProvider, NYC},
        *,
    };

    #[tokio::test]
    async fn repeated_lookup_within_ttl_hits_cache() {
        let service = GeoIpService::new(FakeProvider::replying(NYC), Duration::from_secs(600));
        let first = service.locate("198.51.100.7").await.unwrap();
        let second = service.locate("198.51.100.7").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ip, "198.51.100.7");
        assert_eq!(first.city, "New York");
        assert_eq!(service.provider().calls(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let service = GeoIpService::new(FakeProvider::replying(NYC), Duration::ZERO);
        service.locate("198.51.100.7").await.unwrap();
        service.locate("198.51.100.7").await.unwrap();
        assert_eq!(service.provider().calls(), 2);
    }

    #[tokio::test]
    async fn loopback_resolves_public_address_without_caching() {
        let service = GeoIpService::new(FakeProvider::replying(NYC), Duration::from_secs(600));
        let location = service.locate("127.0.0.1").await.unwrap();
        assert_eq!(location.ip, "203.0.113.9");
        service.locate("127.0.0.1").await.unwrap();
        assert_eq!(service.provider().calls(), 2);
    }

    #[tokio::test]
    async fn unsuccessful_status_maps_to_bad_request() {
        let service = GeoIpService::new(
            FakeProvider::replying(r#"{"status":"fail","message":"private range"}"#),
            Duration::from_secs(600),
        );
        let err = service.locate("10.0.0.1").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Unable to geocode IP");

        let err = service.locate("::1").await.unwrap_err();
        assert_eq!(err.public_message(), "Unable to determine location");
    }

    #[tokio::test]
    async fn non_numeric_coordinates_are_unresolved() {
        let service = GeoIpService::new(
            FakeProvider::replying(r#"{"status":"success","lat":"40","lon":-74}"#),
            Duration::from_secs(600),
        );
        let err = service.locate("198.51.100.7").await.unwrap_err();
        assert!(matches!(err, GeoIpError::Unresolved { .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_a_parse_failure() {
        let service =
            GeoIpService::new(FakeProvider::replying("<html>"), Duration::from_secs(600));
        let err = service.locate("198.51.100.7").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Parse failed");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let service =
            GeoIpService::new(FakeProvider::failing("unreachable"), Duration::from_secs(600));
        let err = service.locate("198.51.100.7").await.unwrap_err();
        assert_eq!(err.public_message(), "Geocoding failed");
        assert!(service.locate("198.51.100.7").await.is_err());
        assert_eq!(service.provider().calls(), 2);
    }

    #[test]
    fn missing_city_and_country_default_to_unknown() {
        let location = parse_reply(
            r#"{"status":"success","lat":1.5,"lon":2.5}"#,
            LookupTarget::Address("198.51.100.7"),
        )
        .unwrap();
        assert_eq!(location.city, UNKNOWN);
        assert_eq!(location.country, UNKNOWN);
    }

    #[test]
    fn provider_urls() {
        let provider =
            HttpGeoProvider::new("https://ip-api.com/json/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            provider.url(LookupTarget::Address("1.2.3.4")),
            "https://ip-api.com/json/1.2.3.4?fields=status,country,city,lat,lon,isp"
        );
        assert_eq!(
            provider.url(LookupTarget::SelfAddress),
            "https://ip-api.com/json/?fields=status,country,city,lat,lon,isp,query"
        );
    }
}
