//! GeoJSON points and great-circle distance
//!
//! Points are stored as GeoJSON so MongoDB's `2dsphere` index can serve
//! radius queries directly. `distance_m` uses the same spherical earth radius
//! MongoDB uses for `$nearSphere`, so the in-memory store and the database
//! agree on who is inside a radius.

use serde::{Deserialize, Serialize};

/// Earth radius in meters as used by MongoDB spherical geometry
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// GeoJSON point, coordinates are `[longitude, latitude]`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    kind: PointType,
    pub coordinates: [f64; 2],
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
enum PointType {
    #[default]
    Point,
}

fn point_type() -> PointType {
    PointType::Point
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: PointType::Point,
            coordinates: [longitude, latitude],
        }
    }

    /// The `[0,0]` placeholder stored for users who never set a location
    pub fn unset() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn is_unset(&self) -> bool {
        self.coordinates == [0.0, 0.0]
    }

    /// Check coordinate ranges
    pub fn is_valid(&self) -> bool {
        let (lng, lat) = (self.longitude(), self.latitude());
        lng.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lng)
            && (-90.0..=90.0).contains(&lat)
    }

    /// Haversine distance in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude().to_radians();
        let lat2 = other.latitude().to_radians();
        let dlat = lat2 - lat1;
        let dlng = (other.longitude() - self.longitude()).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    /// Point `meters` due north of this one
    pub fn offset_north(&self, meters: f64) -> GeoPoint {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        GeoPoint::new(self.longitude(), self.latitude() + dlat)
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::unset()
    }
}
