//! Connection lifecycle: join, report, leave.
//!
//! [`Relay`] owns the registry and the broadcaster behind one lock, so every
//! handler (connect, report, disconnect) runs to completion before the next
//! one starts and observers see snapshots in the same order. The lock is never
//! held across an `.await`.
//!
//! Each connection is driven through a [`Session`]:
//! `Connected` → `Reporting` (⟲ on further reports) → `Disconnected`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info};

use crate::{
    broadcast::{Broadcaster, ObserverSender, encode_snapshot},
    protocol::{ClientEvent, LocationReport},
    registry::{ConnectionId, InvalidCoordinates, LocationRegistry, Snapshot},
};

#[derive(Debug, Default)]
struct RelayState {
    registry: LocationRegistry,
    broadcaster: Broadcaster,
}

/// Shared relay store handed to every connection handler.
#[derive(Debug, Default)]
pub struct Relay {
    state: Mutex<RelayState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Joined, nothing reported yet.
    Connected,
    /// At least one accepted report; the registry holds an entity.
    Reporting,
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReportOutcome {
    /// Registry updated; `delivered` observers were queued the new snapshot.
    Accepted { delivered: usize },
    Rejected(InvalidCoordinates),
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        // A panicking handler must not take the relay down with it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection with a fresh id.
    pub fn connect(self: &Arc<Self>, sender: ObserverSender) -> Session {
        self.connect_with_id(ConnectionId::generate(), sender)
    }

    /// Register a connection and queue the current snapshot for it alone.
    pub fn connect_with_id(self: &Arc<Self>, id: ConnectionId, sender: ObserverSender) -> Session {
        let mut state = self.state();
        state.broadcaster.subscribe(id.clone(), sender);
        match encode_snapshot(state.registry.snapshot()) {
            Ok(frame) => {
                state.broadcaster.send_to(&id, frame);
            }
            Err(err) => error!(connection = %id, "Failed to encode snapshot: {err}"),
        }
        let observers = state.broadcaster.len();
        drop(state);

        metrics::gauge!("tracklive_connections").set(observers as f64);
        info!(connection = %id, observers, "Client connected");
        Session {
            id,
            phase: ConnectionPhase::Connected,
            relay: Arc::clone(self),
        }
    }

    fn report(&self, id: &ConnectionId, report: &LocationReport) -> ReportOutcome {
        let mut state = self.state();
        let now = Utc::now();
        if let Err(err) = state
            .registry
            .upsert(id, report.lat, report.lng, report.name(), now)
        {
            drop(state);
            metrics::counter!("tracklive_reports_total", "outcome" => "rejected").increment(1);
            debug!(connection = %id, "Dropping location report: {err}");
            return ReportOutcome::Rejected(err);
        }

        let delivered = broadcast_locked(&mut state);
        drop(state);

        metrics::counter!("tracklive_reports_total", "outcome" => "accepted").increment(1);
        info!(
            connection = %id,
            "user-location {:.6}, {:.6}",
            report.lat,
            report.lng
        );
        ReportOutcome::Accepted { delivered }
    }

    /// Remove the connection; re-broadcast only if an entity was removed.
    fn disconnect(&self, id: &ConnectionId) -> bool {
        let mut state = self.state();
        state.broadcaster.unsubscribe(id);
        let removed = state.registry.remove(id).is_some();
        if removed {
            broadcast_locked(&mut state);
        }
        let observers = state.broadcaster.len();
        drop(state);

        metrics::gauge!("tracklive_connections").set(observers as f64);
        info!(connection = %id, removed, observers, "Client disconnected");
        removed
    }

    /// Copy of the current registry contents.
    pub fn snapshot(&self) -> Snapshot {
        self.state().registry.snapshot().clone()
    }

    pub fn observer_count(&self) -> usize {
        self.state().broadcaster.len()
    }
}

fn broadcast_locked(state: &mut RelayState) -> usize {
    match encode_snapshot(state.registry.snapshot()) {
        Ok(frame) => {
            let delivered = state.broadcaster.broadcast(frame);
            metrics::counter!("tracklive_broadcasts_total").increment(1);
            delivered
        }
        Err(err) => {
            error!("Failed to encode snapshot: {err}");
            0
        }
    }
}

/// Per-connection handle. Dropping it disconnects, so a connection task that
/// dies early still removes its entity.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    phase: ConnectionPhase,
    relay: Arc<Relay>,
}

impl Session {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Apply one inbound client event.
    pub fn handle(&mut self, event: ClientEvent) -> Option<ReportOutcome> {
        match event {
            ClientEvent::UserLocation(report) => Some(self.report(&report)),
            ClientEvent::Track(target) => {
                info!(connection = %self.id, target = %target, "Client tracking entity");
                None
            }
        }
    }

    pub fn report(&mut self, report: &LocationReport) -> ReportOutcome {
        let outcome = self.relay.report(&self.id, report);
        if matches!(outcome, ReportOutcome::Accepted { .. }) {
            self.phase = ConnectionPhase::Reporting;
        }
        outcome
    }

    /// Leave the relay. Returns whether an entity was removed.
    pub fn close(mut self) -> bool {
        self.phase = ConnectionPhase::Disconnected;
        self.relay.disconnect(&self.id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.phase != ConnectionPhase::Disconnected {
            self.phase = ConnectionPhase::Disconnected;
            self.relay.disconnect(&self.id);
        }
    }
}
