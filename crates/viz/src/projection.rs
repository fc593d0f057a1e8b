//! Flat equirectangular projection around the view center.
//!
//! Only accurate for city-scale spans: no cosine correction and no wrap at
//! the antimeridian.

/// Fallback center used until an entity is followed.
pub const DEFAULT_CENTER: GeoPoint = GeoPoint {
    lat: 40.7128,
    lng: -74.0060,
};
/// Pixels per degree.
pub const DEFAULT_SCALE: f64 = 100_000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Position in CSS pixels, origin top-left, y down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewState {
    pub center: GeoPoint,
    /// Pixels per degree, fixed for a session.
    pub scale: f64,
    pub width: f64,
    pub height: f64,
    pub followed: Option<String>,
}

impl ViewState {
    pub fn new(center: GeoPoint, scale: f64, width: f64, height: f64) -> Self {
        Self {
            center,
            scale,
            width,
            height,
            followed: None,
        }
    }

    pub fn project(&self, point: GeoPoint) -> PixelPoint {
        project(point.lat, point.lng, self)
    }

    pub fn unproject(&self, pixel: PixelPoint) -> GeoPoint {
        unproject(pixel.x, pixel.y, self)
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new(DEFAULT_CENTER, DEFAULT_SCALE, 0.0, 0.0)
    }
}

pub fn project(lat: f64, lng: f64, view: &ViewState) -> PixelPoint {
    PixelPoint {
        x: (lng - view.center.lng) * view.scale + view.width / 2.0,
        y: (view.center.lat - lat) * view.scale + view.height / 2.0,
    }
}

pub fn unproject(x: f64, y: f64, view: &ViewState) -> GeoPoint {
    GeoPoint {
        lat: view.center.lat - (y - view.height / 2.0) / view.scale,
        lng: view.center.lng + (x - view.width / 2.0) / view.scale,
    }
}
