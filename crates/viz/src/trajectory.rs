//! Client-side trajectory history built from relay snapshots.
//!
//! Each entity keeps at most `limit` points in arrival order; the oldest
//! point is evicted first.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use relay::Snapshot;

use crate::{kinematics::Kinematics, projection::GeoPoint};

pub const DEFAULT_TRAJECTORY_LIMIT: usize = 200;

pub type Trajectory = VecDeque<GeoPoint>;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedEntity {
    pub name: String,
    pub trajectory: Trajectory,
    pub kinematics: Kinematics,
    last_update: Option<DateTime<Utc>>,
}

impl TrackedEntity {
    fn new() -> Self {
        Self {
            name: String::new(),
            trajectory: Trajectory::new(),
            kinematics: Kinematics::default(),
            last_update: None,
        }
    }

    /// Most recent position, the entity's current location.
    pub fn position(&self) -> Option<GeoPoint> {
        self.trajectory.back().copied()
    }
}

#[derive(Clone, Debug)]
pub struct TrajectoryStore {
    limit: usize,
    entities: HashMap<String, TrackedEntity>,
}

impl Default for TrajectoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRAJECTORY_LIMIT)
    }
}

impl TrajectoryStore {
    /// `limit` is clamped to at least one point.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entities: HashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append a point to `id`'s trajectory, evicting the oldest on overflow.
    pub fn append_point(&mut self, id: &str, lat: f64, lng: f64) {
        let limit = self.limit;
        let entity = self
            .entities
            .entry(id.to_string())
            .or_insert_with(TrackedEntity::new);
        push_bounded(&mut entity.trajectory, GeoPoint::new(lat, lng), limit);
    }

    /// Fold a relay snapshot into the store.
    ///
    /// A point is appended only for entities whose `lastUpdate` changed since
    /// the previous snapshot, so re-broadcasts triggered by other entities do
    /// not duplicate points. Entities missing from the snapshot are dropped.
    pub fn ingest(&mut self, snapshot: &Snapshot) {
        self.entities
            .retain(|id, _| snapshot.keys().any(|key| key.as_str() == id));

        let limit = self.limit;
        for (id, reported) in snapshot {
            let entity = self
                .entities
                .entry(id.as_str().to_string())
                .or_insert_with(TrackedEntity::new);
            entity.name.clone_from(&reported.name);
            if entity.last_update == Some(reported.last_update) {
                continue;
            }

            let point = GeoPoint::new(reported.lat, reported.lng);
            if let (Some(previous), Some(previous_at)) = (entity.position(), entity.last_update) {
                entity.kinematics = Kinematics::between(
                    &entity.kinematics,
                    (previous, previous_at),
                    (point, reported.last_update),
                );
            }
            push_bounded(&mut entity.trajectory, point, limit);
            entity.last_update = Some(reported.last_update);
        }
    }

    pub fn get(&self, id: &str) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    pub fn get_all(&self) -> &HashMap<String, TrackedEntity> {
        &self.entities
    }

    /// Entity ids in a stable order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn push_bounded(trajectory: &mut Trajectory, point: GeoPoint, limit: usize) {
    trajectory.push_back(point);
    while trajectory.len() > limit {
        trajectory.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use relay::{ConnectionId, Entity};

    use super::*;
    use crate::kinematics::MovementStatus;

    fn entity(id: &str, lat: f64, lng: f64, at: DateTime<Utc>) -> (ConnectionId, Entity) {
        let id = ConnectionId::from(id);
        (
            id.clone(),
            Entity {
                id,
                lat,
                lng,
                name: "User".into(),
                last_update: at,
            },
        )
    }

    #[test]
    fn overflow_keeps_last_n_in_arrival_order() {
        let limit = 5;
        let mut store = TrajectoryStore::new(limit);
        for i in 0..(limit + 3) {
            store.append_point("a", i as f64, 0.0);
            assert!(store.get("a").unwrap().trajectory.len() <= limit);
        }
        let lats: Vec<f64> = store
            .get("a")
            .unwrap()
            .trajectory
            .iter()
            .map(|p| p.lat)
            .collect();
        assert_eq!(lats, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn two_reports_give_two_ordered_points() {
        let mut store = TrajectoryStore::default();
        let t0 = Utc::now();
        store.ingest(&Snapshot::from([entity("a", 40.0, -74.0, t0)]));
        store.ingest(&Snapshot::from([entity(
            "a",
            40.001,
            -74.001,
            t0 + Duration::seconds(2),
        )]));

        let tracked = store.get("a").unwrap();
        assert_eq!(
            tracked.trajectory,
            Trajectory::from([GeoPoint::new(40.0, -74.0), GeoPoint::new(40.001, -74.001)])
        );
        assert_eq!(tracked.position(), Some(GeoPoint::new(40.001, -74.001)));
    }

    #[test]
    fn rebroadcast_without_new_report_does_not_duplicate() {
        let mut store = TrajectoryStore::default();
        let t0 = Utc::now();
        let a = entity("a", 40.0, -74.0, t0);
        store.ingest(&Snapshot::from([a.clone()]));
        store.ingest(&Snapshot::from([a.clone(), entity("b", 41.0, -73.0, t0)]));
        store.ingest(&Snapshot::from([a, entity("b", 41.0, -73.0, t0)]));

        assert_eq!(store.get("a").unwrap().trajectory.len(), 1);
        assert_eq!(store.get("b").unwrap().trajectory.len(), 1);
    }

    #[test]
    fn departed_entities_are_dropped() {
        let mut store = TrajectoryStore::default();
        let t0 = Utc::now();
        store.ingest(&Snapshot::from([
            entity("a", 40.0, -74.0, t0),
            entity("b", 41.0, -73.0, t0),
        ]));
        store.ingest(&Snapshot::from([entity("b", 41.0, -73.0, t0)]));
        assert!(store.get("a").is_none());
        assert_eq!(store.ids(), vec!["b"]);
    }

    #[test]
    fn ingest_derives_heading_and_status() {
        let mut store = TrajectoryStore::default();
        let t0 = Utc::now();
        store.ingest(&Snapshot::from([entity("a", 40.0, -74.0, t0)]));
        assert_eq!(
            store.get("a").unwrap().kinematics.status,
            MovementStatus::Stationary
        );

        store.ingest(&Snapshot::from([entity(
            "a",
            40.0001,
            -74.0,
            t0 + Duration::seconds(2),
        )]));
        let kinematics = store.get("a").unwrap().kinematics;
        assert_eq!(kinematics.status, MovementStatus::Moving);
        assert!(kinematics.heading < 0.1 || kinematics.heading > 359.9);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let mut store = TrajectoryStore::new(0);
        store.append_point("a", 1.0, 1.0);
        store.append_point("a", 2.0, 2.0);
        assert_eq!(store.limit(), 1);
        assert_eq!(store.get("a").unwrap().trajectory.len(), 1);
    }
}
