//! Configuration parsing for the relay server.
//!
//! This module owns translation of CLI arguments (and their environment
//! fallbacks) into a [`RelayConfig`] which the server uses without re-parsing.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Args;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_GEO_PROVIDER: &str = "https://ip-api.com/json";

#[derive(Clone, Debug)]
/// Canonical configuration for one server run.
pub struct RelayConfig {
    /// Interface address to bind.
    pub bind: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Origin allowed to open the WebSocket and read the API (`*` for any).
    pub allowed_origin: String,
    /// Directory served verbatim for every path not claimed by a route.
    pub public_dir: PathBuf,
    pub geoip: GeoIpOptions,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug)]
/// Upstream geolocation provider settings.
pub struct GeoIpOptions {
    /// Base URL of the ip-api.com compatible endpoint.
    pub provider_url: String,
    /// Upper bound on each outbound lookup.
    pub timeout: Duration,
    /// How long a per-address result is reused.
    pub cache_ttl: Duration,
}

impl Default for GeoIpOptions {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_GEO_PROVIDER.to_string(),
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Interface address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
    /// Allowed cross-origin source.
    #[arg(long = "cors-origin", env = "CORS_ORIGIN", default_value = DEFAULT_CORS_ORIGIN)]
    pub cors_origin: String,
    /// Directory of static assets.
    #[arg(long = "public-dir", value_name = "PATH", default_value = "public")]
    pub public_dir: PathBuf,
    /// Geolocation provider base URL.
    #[arg(long = "geo-provider", value_name = "URL", default_value = DEFAULT_GEO_PROVIDER)]
    pub geo_provider: String,
    /// Timeout for a single geolocation lookup.
    #[arg(long = "geo-timeout-secs", value_name = "SECS", default_value_t = 5)]
    pub geo_timeout_secs: u64,
    /// Lifetime of cached geolocation results.
    #[arg(long = "geo-cache-ttl-secs", value_name = "SECS", default_value_t = 600)]
    pub geo_cache_ttl_secs: u64,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ServeArgs> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        if args.port == 0 {
            bail!("--port must be between 1 and 65535");
        }
        if args.bind.trim().is_empty() {
            bail!("--bind must not be empty");
        }
        let allowed_origin = args.cors_origin.trim().trim_end_matches('/').to_string();
        if allowed_origin.is_empty() {
            bail!("--cors-origin must not be empty");
        }
        if args.geo_timeout_secs == 0 {
            bail!("--geo-timeout-secs must be at least 1");
        }
        if !(args.geo_provider.starts_with("http://") || args.geo_provider.starts_with("https://"))
        {
            bail!("--geo-provider must be an http(s) URL");
        }

        Ok(Self {
            bind: args.bind,
            port: args.port,
            allowed_origin,
            public_dir: args.public_dir,
            geoip: GeoIpOptions {
                provider_url: args.geo_provider,
                timeout: Duration::from_secs(args.geo_timeout_secs),
                cache_ttl: Duration::from_secs(args.geo_cache_ttl_secs),
            },
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}
