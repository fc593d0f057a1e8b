//! Live-position relay: an authoritative per-connection location registry that
//! pushes full snapshots to every connected observer.
//!
//! The crate is split into focused modules:
//! - `registry`: connection-keyed entity store and coordinate validation.
//! - `broadcast`: snapshot serialization and fan-out to observer queues.
//! - `lifecycle`: join/report/leave handling around one shared `Relay`.
//! - `protocol`: JSON envelopes carried over the WebSocket.
//! - `geoip`: client IP geolocation with a short-lived cache.
//! - `server`: Actix Web routes (WebSocket, API, metrics, static assets).
//! - `config`: CLI configuration parsing.
//! - `telemetry`: tracing subscriber, metrics recorder, panic hook.

pub mod broadcast;
pub mod config;
pub mod geoip;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use config::{RelayConfig, ServeArgs, TelemetryOptions};
pub use lifecycle::{ConnectionPhase, Relay, ReportOutcome, Session};
pub use registry::{ConnectionId, Entity, Snapshot};

/// Run the relay server on the current thread until it is stopped.
pub fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let _telemetry_guard = telemetry::init_tracing(&config.telemetry);
    telemetry::install_panic_hook();
    if let Err(err) = telemetry::init_metrics_recorder() {
        tracing::warn!("Metrics disabled: {err}");
    }
    let span = tracing::info_span!("relay.server", port = config.port);
    let _span_guard = span.enter();

    actix_web::rt::System::new().block_on(server::run(config))
}
