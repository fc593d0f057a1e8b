//! Authoritative "last known position per connection" store.
//!
//! Every key present maps to an entity whose coordinates passed
//! [`validate_coordinates`]; keys are removed when their connection goes away.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Display name used when a report carries no usable name.
pub const DEFAULT_ENTITY_NAME: &str = "User";

/// Identifier of a single transport connection. Doubles as the entity id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest reported location of one connected device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: ConnectionId,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub last_update: DateTime<Utc>,
}

/// Full registry contents, keyed and ordered by connection id.
pub type Snapshot = BTreeMap<ConnectionId, Entity>;

#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum InvalidCoordinates {
    #[error("coordinates must be finite numbers (lat {lat}, lng {lng})")]
    NonFinite { lat: f64, lng: f64 },
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// Check that a coordinate pair is finite and inside the WGS84 ranges.
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), InvalidCoordinates> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(InvalidCoordinates::NonFinite { lat, lng });
    }
    if lat.abs() > 90.0 {
        return Err(InvalidCoordinates::LatitudeOutOfRange(lat));
    }
    if lng.abs() > 180.0 {
        return Err(InvalidCoordinates::LongitudeOutOfRange(lng));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct LocationRegistry {
    entities: Snapshot,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entity owned by `id`.
    ///
    /// Invalid coordinates leave the registry untouched.
    pub fn upsert(
        &mut self,
        id: &ConnectionId,
        lat: f64,
        lng: f64,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<&Entity, InvalidCoordinates> {
        validate_coordinates(lat, lng)?;
        let entity = Entity {
            id: id.clone(),
            lat,
            lng,
            name: name.unwrap_or(DEFAULT_ENTITY_NAME).to_string(),
            last_update: now,
        };
        self.entities.insert(id.clone(), entity);
        Ok(&self.entities[id])
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Entity> {
        self.entities.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.entities
    }
}
