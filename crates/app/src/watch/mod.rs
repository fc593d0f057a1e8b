//! `watch`: follow the relay and render trajectories to a PNG.
//!
//! The async client runs on an Actix system on the calling thread and hands
//! every snapshot to a dedicated render thread over an unbounded channel.
//!
//! The output image has no host container, so its CSS size and pixel density
//! are fixed for the session by `--width`, `--height` and `--dpr`; the
//! renderer is sized once through `Renderer::resize` when the worker starts.

mod client;
mod config;
mod worker;

use anyhow::{Context, Result, anyhow};
use relay::{TelemetryOptions, telemetry};
use tracing::info;

pub use config::{DEFAULT_SERVER_URL, WatchArgs, WatchConfig};

pub fn run(config: WatchConfig) -> Result<()> {
    let _telemetry_guard = telemetry::init_tracing(&TelemetryOptions::default());
    telemetry::install_panic_hook();

    let (snapshot_tx, snapshot_rx) = crossbeam_channel::unbounded();
    let render = worker::spawn_render_worker(&config, snapshot_rx)
        .context("Failed to spawn render worker")?;
    info!(
        "Watching {} -> {} ({}x{} @{}x)",
        config.server_url,
        config.output.display(),
        config.width,
        config.height,
        config.dpr
    );

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler unavailable: {err}");
            std::future::pending::<()>().await;
        }
        info!("Interrupted; stopping watcher");
    };
    let result =
        actix_web::rt::System::new().block_on(client::run(&config, snapshot_tx, shutdown));

    render
        .join()
        .map_err(|_| anyhow!("render worker panicked"))?;
    result
}
