//! Actix Web server exposing the WebSocket relay, the JSON API, metrics, and
//! static assets.
//!
//! Each WebSocket connection gets its own task that multiplexes inbound
//! client events with its latest pending snapshot.

use actix_files::Files;
use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::header,
    middleware::DefaultHeaders,
    web,
};
use actix_ws::{Message, MessageStream, Session as WsSession};
use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::json;
use tracing::{Instrument, debug, info, warn};

use crate::{
    broadcast::{ObserverReceiver, observer_channel},
    config::RelayConfig,
    geoip::{GeoIpService, GeoProvider, HttpGeoProvider},
    lifecycle::{Relay, Session},
    protocol::ClientEvent,
    telemetry,
};

/// Largest inbound WebSocket frame accepted; location reports are tiny.
const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Origin policy applied to WebSocket upgrades.
#[derive(Clone, Debug)]
pub struct OriginPolicy {
    allowed: String,
}

impl OriginPolicy {
    pub fn new(allowed: impl Into<String>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.allowed == "*" || self.allowed == origin.trim_end_matches('/')
    }

    pub fn allowed(&self) -> &str {
        &self.allowed
    }
}

/// Register the relay routes. `Relay` and `GeoIpService<P>` must already be
/// present as app data.
pub fn configure<P: GeoProvider>(origin: OriginPolicy) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        let cors = DefaultHeaders::new()
            .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.allowed().to_string()));
        cfg.app_data(web::Data::new(origin))
            .route("/ws", web::get().to(ws_route))
            .route("/metrics", web::get().to(metrics_route))
            .service(
                web::scope("/api")
                    .wrap(cors)
                    .route("/objects", web::get().to(objects_route))
                    .route("/geo-ip", web::get().to(geo_ip_route::<P>)),
            );
    }
}

/// Bind and run the server until it is stopped by a signal.
pub async fn run(config: RelayConfig) -> Result<()> {
    let relay = web::Data::new(Relay::new());
    let geoip = web::Data::new(
        GeoIpService::from_options(&config.geoip)
            .context("Failed to build geolocation client")?,
    );
    let origin = OriginPolicy::new(config.allowed_origin.clone());
    let public_dir = config.public_dir.clone();
    if !public_dir.is_dir() {
        warn!(
            "Static directory {} does not exist; only API routes will respond",
            public_dir.display()
        );
    }

    let server = HttpServer::new(move || {
        App::new()
            .app_data(relay.clone())
            .app_data(geoip.clone())
            .configure(configure::<HttpGeoProvider>(origin.clone()))
            .service(Files::new("/", public_dir.clone()).index_file("index.html"))
    })
    .bind((config.bind.as_str(), config.port))
    .with_context(|| format!("Failed to bind {}:{}", config.bind, config.port))?
    .run();

    info!(
        "Server listening on http://{}:{} (allowed origin {})",
        config.bind, config.port, config.allowed_origin
    );
    server.await.context("HTTP server error")?;
    info!("Server stopped");
    Ok(())
}

/// Upgrade to a WebSocket and hand the connection to its own task.
async fn ws_route(
    req: HttpRequest,
    body: web::Payload,
    relay: web::Data<Relay>,
    origin: web::Data<OriginPolicy>,
) -> actix_web::Result<HttpResponse> {
    if let Some(value) = req.headers().get(header::ORIGIN) {
        let requested = value.to_str().unwrap_or_default();
        if !origin.allows(requested) {
            warn!("Refusing WebSocket from origin {requested:?}");
            return Ok(HttpResponse::Forbidden().finish());
        }
    }

    let (response, ws, stream) = actix_ws::handle(&req, body)?;
    let stream = stream.max_frame_size(MAX_FRAME_BYTES);

    let (tx, outbound) = observer_channel();
    let session = relay.into_inner().connect(tx);
    let span = tracing::info_span!("relay.connection", connection = %session.id());
    actix_web::rt::spawn(run_connection(session, outbound, ws, stream).instrument(span));
    Ok(response)
}

async fn run_connection(
    mut session: Session,
    mut outbound: ObserverReceiver,
    mut ws: WsSession,
    mut stream: MessageStream,
) {
    loop {
        tokio::select! {
            changed = outbound.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = outbound.borrow_and_update().clone();
                let Some(frame) = frame else { continue };
                if ws.text(frame.to_string()).await.is_err() {
                    debug!("Outbound send failed; connection closed");
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        session.handle(event);
                    }
                    Err(err) => debug!("Ignoring malformed client frame: {err}"),
                },
                Some(Ok(Message::Ping(bytes))) => {
                    if ws.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(reason))) => {
                    debug!("Client closed connection: {reason:?}");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("WebSocket protocol error: {err}");
                    break;
                }
                None => break,
            },
        }
    }

    session.close();
    if let Err(err) = ws.close(None).await {
        debug!("WebSocket already closed: {err:?}");
    }
}

/// Legacy surface kept for older clients; always an empty object.
async fn objects_route() -> HttpResponse {
    HttpResponse::Ok().json(json!({}))
}

async fn geo_ip_route<P: GeoProvider>(
    req: HttpRequest,
    geoip: web::Data<GeoIpService<P>>,
) -> HttpResponse {
    let client_ip = client_address(&req);
    info!("Geolocation request from IP: {client_ip}");
    match geoip.locate(&client_ip).await {
        Ok(location) => HttpResponse::Ok().json(location),
        Err(err) => {
            warn!("Geolocation for {client_ip} failed: {err:?}");
            HttpResponse::build(err.status()).json(json!({ "error": err.public_message() }))
        }
    }
}

/// Prometheus text exposition of relay metrics.
async fn metrics_route() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NoContent().finish(),
    }
}

/// First `X-Forwarded-For` hop, else the peer IP.
fn client_address(req: &HttpRequest) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match forwarded {
        Some(address) => address.to_string(),
        None => req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}
