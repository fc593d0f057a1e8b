//! Speed and heading derived from consecutive position fixes.

use chrono::{DateTime, Utc};

use crate::projection::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Below this speed an entity is drawn as stationary.
pub const MOVING_THRESHOLD_MPS: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MovementStatus {
    Moving,
    #[default]
    Stationary,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Kinematics {
    pub status: MovementStatus,
    /// Metres per second.
    pub speed: f64,
    /// Degrees clockwise from north, in `[0, 360)`.
    pub heading: f64,
}

impl Kinematics {
    /// Estimate motion between two timestamped fixes.
    ///
    /// A non-positive time delta yields a stationary estimate that keeps the
    /// previous heading.
    pub fn between(
        previous: &Kinematics,
        from: (GeoPoint, DateTime<Utc>),
        to: (GeoPoint, DateTime<Utc>),
    ) -> Kinematics {
        let elapsed = (to.1 - from.1).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return Kinematics {
                status: MovementStatus::Stationary,
                speed: 0.0,
                heading: previous.heading,
            };
        }

        let speed = haversine_distance(from.0, to.0) / elapsed;
        if speed < MOVING_THRESHOLD_MPS {
            return Kinematics {
                status: MovementStatus::Stationary,
                speed,
                heading: previous.heading,
            };
        }
        Kinematics {
            status: MovementStatus::Moving,
            speed,
            heading: initial_bearing(from.0, to.0),
        }
    }

    pub fn is_moving(&self) -> bool {
        self.status == MovementStatus::Moving && self.speed > 0.0
    }
}

/// Great-circle distance in metres.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` to `b`, degrees clockwise from north.
pub fn initial_bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lng = (b.lng - a.lng).to_radians();
    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn bearing_cardinal_directions() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert!((initial_bearing(origin, GeoPoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((initial_bearing(origin, GeoPoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((initial_bearing(origin, GeoPoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((initial_bearing(origin, GeoPoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 50.0, "{d}");
    }

    #[test]
    fn walking_east_is_moving() {
        let t0 = Utc::now();
        let k = Kinematics::between(
            &Kinematics::default(),
            (GeoPoint::new(40.0, -74.0), t0),
            (GeoPoint::new(40.0, -73.9999), t0 + Duration::seconds(5)),
        );
        assert_eq!(k.status, MovementStatus::Moving);
        assert!(k.speed > 1.0 && k.speed < 2.0, "{}", k.speed);
        assert!((k.heading - 90.0).abs() < 0.1);
        assert!(k.is_moving());
    }

    #[test]
    fn zero_elapsed_time_is_stationary() {
        let t0 = Utc::now();
        let previous = Kinematics {
            status: MovementStatus::Moving,
            speed: 3.0,
            heading: 45.0,
        };
        let k = Kinematics::between(
            &previous,
            (GeoPoint::new(40.0, -74.0), t0),
            (GeoPoint::new(40.1, -74.0), t0),
        );
        assert_eq!(k.status, MovementStatus::Stationary);
        assert_eq!(k.heading, 45.0);
        assert!(!k.is_moving());
    }
}
