//! Full-snapshot fan-out to connected observers.
//!
//! Each observer holds a single latest-frame slot. A snapshot is serialized
//! once and replaces whatever the slot held, so a connection that stops
//! reading keeps one pending frame rather than a growing backlog.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::watch;
use tracing::debug;

use crate::{
    protocol::ServerEvent,
    registry::{ConnectionId, Snapshot},
};

/// Serialized `users` frame shared between all observers.
pub type Outbound = Arc<str>;
pub type ObserverSender = watch::Sender<Option<Outbound>>;
pub type ObserverReceiver = watch::Receiver<Option<Outbound>>;

/// Slot for one connection; empty until the first snapshot is queued.
pub fn observer_channel() -> (ObserverSender, ObserverReceiver) {
    watch::channel(None)
}

/// Serialize a snapshot into a `users` frame.
pub fn encode_snapshot(snapshot: &Snapshot) -> serde_json::Result<Outbound> {
    serde_json::to_string(&ServerEvent::Users(snapshot)).map(Outbound::from)
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    observers: HashMap<ConnectionId, ObserverSender>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, id: ConnectionId, sender: ObserverSender) {
        self.observers.insert(id, sender);
    }

    /// Returns `true` when `id` was subscribed.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> bool {
        self.observers.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Replace the pending frame of a single observer.
    pub fn send_to(&self, id: &ConnectionId, frame: Outbound) -> bool {
        match self.observers.get(id) {
            Some(sender) => sender.send(Some(frame)).is_ok(),
            None => false,
        }
    }

    /// Replace every observer's pending frame and return how many are still
    /// listening.
    ///
    /// Observers whose receiver is gone are dropped; their connection task has
    /// ended and will not read again.
    pub fn broadcast(&mut self, frame: Outbound) -> usize {
        let mut delivered = 0;
        self.observers.retain(|id, sender| match sender.send(Some(frame.clone())) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!(connection = %id, "Dropping observer with closed slot");
                false
            }
        });
        delivered
    }
}
