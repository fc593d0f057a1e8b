//! WebSocket client feeding relay snapshots to the render worker.

use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use awc::ws;
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use relay::{
    Snapshot,
    protocol::{ClientEvent, ServerMessage},
};
use tracing::{debug, info, warn};

use super::config::WatchConfig;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Why a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The relay closed the stream; reconnect.
    Closed,
    /// The render worker is gone; nothing left to feed.
    WorkerStopped,
}

/// Keep a connection to the relay open until `shutdown` resolves or the
/// render worker exits, reconnecting after [`RECONNECT_DELAY`].
pub async fn run(
    config: &WatchConfig,
    snapshots: Sender<Snapshot>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            outcome = connect_once(config, &snapshots) => match outcome {
                Ok(SessionEnd::WorkerStopped) => {
                    return Err(anyhow!("render worker stopped unexpectedly"));
                }
                Ok(SessionEnd::Closed) => info!("Relay closed the connection"),
                Err(err) => warn!("Relay connection failed: {err:#}"),
            },
            () = &mut shutdown => return Ok(()),
        }

        tokio::select! {
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
            () = &mut shutdown => return Ok(()),
        }
        debug!("Reconnecting to {}", config.server_url);
    }
}

async fn connect_once(config: &WatchConfig, snapshots: &Sender<Snapshot>) -> Result<SessionEnd> {
    let (_response, mut framed) = awc::Client::new()
        .ws(config.server_url.as_str())
        .connect()
        .await
        .map_err(|err| anyhow!("connect to {} failed: {err}", config.server_url))?;
    info!("Connected to {}", config.server_url);

    if let Some(id) = &config.follow {
        let track = serde_json::to_string(&ClientEvent::Track(id.clone()))
            .context("Failed to encode track event")?;
        framed
            .send(ws::Message::Text(track.into()))
            .await
            .map_err(|err| anyhow!("send track event: {err}"))?;
    }

    while let Some(frame) = framed.next().await {
        match frame.map_err(|err| anyhow!("protocol error: {err}"))? {
            ws::Frame::Text(bytes) => {
                let Some(snapshot) = decode_snapshot(&bytes) else {
                    continue;
                };
                if snapshots.send(snapshot).is_err() {
                    return Ok(SessionEnd::WorkerStopped);
                }
            }
            ws::Frame::Ping(bytes) => {
                framed
                    .send(ws::Message::Pong(bytes))
                    .await
                    .map_err(|err| anyhow!("send pong: {err}"))?;
            }
            ws::Frame::Close(reason) => {
                debug!("Relay sent close: {reason:?}");
                break;
            }
            _ => {}
        }
    }
    Ok(SessionEnd::Closed)
}

fn decode_snapshot(bytes: &[u8]) -> Option<Snapshot> {
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(ServerMessage::Users(snapshot)) => Some(snapshot),
        Err(err) => {
            debug!("Ignoring unrecognised relay frame: {err}");
            None
        }
    }
}
