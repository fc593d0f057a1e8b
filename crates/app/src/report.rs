//! `report`: publish a fixed position to the relay until interrupted.

use anyhow::{Context, Result, anyhow, bail};
use awc::ws;
use clap::Args;
use futures::{SinkExt, StreamExt};
use relay::{
    TelemetryOptions,
    protocol::{ClientEvent, LocationReport},
    registry::validate_coordinates,
    telemetry,
};
use tracing::{debug, info};

use crate::watch::DEFAULT_SERVER_URL;

/// CLI arguments accepted by the `report` subcommand.
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Relay WebSocket URL.
    #[arg(long, value_name = "URL", default_value = DEFAULT_SERVER_URL)]
    pub server: String,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,
    /// Display name; the relay uses "User" when absent.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReportConfig {
    pub server_url: String,
    pub report: LocationReport,
}

impl TryFrom<ReportArgs> for ReportConfig {
    type Error = anyhow::Error;

    fn try_from(args: ReportArgs) -> Result<Self> {
        if !(args.server.starts_with("ws://") || args.server.starts_with("wss://")) {
            bail!("--server must be a ws:// or wss:// URL");
        }
        validate_coordinates(args.lat, args.lng).context("invalid --lat/--lng")?;
        Ok(Self {
            server_url: args.server,
            report: LocationReport::new(args.lat, args.lng, args.name),
        })
    }
}

pub fn run(config: ReportConfig) -> Result<()> {
    let _telemetry_guard = telemetry::init_tracing(&TelemetryOptions::default());
    actix_web::rt::System::new().block_on(publish(config))
}

async fn publish(config: ReportConfig) -> Result<()> {
    let (_response, mut framed) = awc::Client::new()
        .ws(config.server_url.as_str())
        .connect()
        .await
        .map_err(|err| anyhow!("connect to {} failed: {err}", config.server_url))?;

    let event = serde_json::to_string(&ClientEvent::UserLocation(config.report.clone()))
        .context("Failed to encode location report")?;
    framed
        .send(ws::Message::Text(event.into()))
        .await
        .map_err(|err| anyhow!("send location report: {err}"))?;
    info!(
        "Reported ({}, {}) to {}; Ctrl-C to leave",
        config.report.lat, config.report.lng, config.server_url
    );

    // The entity lives as long as the connection, so keep draining frames.
    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(ws::Frame::Ping(bytes))) => {
                    framed
                        .send(ws::Message::Pong(bytes))
                        .await
                        .map_err(|err| anyhow!("send pong: {err}"))?;
                }
                Some(Ok(ws::Frame::Close(reason))) => {
                    bail!("relay closed the connection: {reason:?}");
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => bail!("protocol error: {err}"),
                None => bail!("relay closed the connection"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    debug!("Closing relay connection");
    if let Err(err) = framed.close().await {
        debug!("Relay connection already closed: {err}");
    }
    Ok(())
}
