//! Spatial primitives for geoquery
//!
//! Geographic points, great-circle distance and the degree envelopes used to
//! turn a radius search into an R-tree range query.

use crate::error::{GeoQueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used for every distance in this crate.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// A geographic point in WGS84 (EPSG:4326).
///
/// # Examples
///
/// ```rust
/// use geoquery::Point;
///
/// let new_york = Point::new(40.7128, -74.0060);
/// let london = Point::new(51.5074, -0.1278);
///
/// let distance_km = new_york.distance_to(&london) / 1000.0;
/// assert!(distance_km > 5500.0 && distance_km < 5600.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees (-90.0 to +90.0)
    pub lat: f64,
    /// Longitude in decimal degrees (-180.0 to +180.0)
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Creates a point, rejecting non-finite or out-of-range coordinates.
    pub fn checked(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeoQueryError::validation(format!(
                "latitude {} is outside [-90, 90]",
                lat
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(GeoQueryError::validation(format!(
                "longitude {} is outside [-180, 180]",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance in meters (Haversine formula).
    pub fn distance_to(&self, other: &Point) -> f64 {
        let lat1 = self.lat * TO_RAD;
        let lat2 = other.lat * TO_RAD;
        let dlat = (other.lat - self.lat) * TO_RAD;
        let dlon = (other.lon - self.lon) * TO_RAD;

        let sin_half_dlat = (dlat * 0.5).sin();
        let sin_half_dlon = (dlon * 0.5).sin();

        let a =
            sin_half_dlat * sin_half_dlat + lat1.cos() * lat2.cos() * sin_half_dlon * sin_half_dlon;
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    pub fn to_geo(&self) -> geo::Point<f64> {
        geo::Point::new(self.lon, self.lat)
    }

    pub fn from_geo(point: geo::Point<f64>) -> Self {
        Self::new(point.y(), point.x())
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// A latitude/longitude aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Corners as `[lon, lat]` pairs, the axis order used by the R-trees.
    pub fn corners(&self) -> ([f64; 2], [f64; 2]) {
        ([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }

    /// Boxes that together cover every point within `radius_meters` of
    /// `center`. Two boxes are returned when the cap crosses the antimeridian;
    /// caps reaching a pole span all longitudes.
    pub fn covering_radius(center: &Point, radius_meters: f64) -> Vec<BoundingBox> {
        // Pad against floating point error at the cap edge.
        const PAD_DEG: f64 = 1e-7;

        let angular = radius_meters / EARTH_RADIUS_M;
        if angular >= std::f64::consts::FRAC_PI_2 {
            return vec![BoundingBox::new(-90.0, -180.0, 90.0, 180.0)];
        }

        let dlat = angular.to_degrees() + PAD_DEG;
        let min_lat = center.lat - dlat;
        let max_lat = center.lat + dlat;
        if min_lat <= -90.0 || max_lat >= 90.0 {
            return vec![BoundingBox::new(
                min_lat.max(-90.0),
                -180.0,
                max_lat.min(90.0),
                180.0,
            )];
        }

        let ratio = angular.sin() / (center.lat * TO_RAD).cos();
        if ratio >= 1.0 {
            return vec![BoundingBox::new(min_lat, -180.0, max_lat, 180.0)];
        }
        let dlon = ratio.asin().to_degrees() + PAD_DEG;
        let min_lon = center.lon - dlon;
        let max_lon = center.lon + dlon;

        if min_lon < -180.0 {
            vec![
                BoundingBox::new(min_lat, min_lon + 360.0, max_lat, 180.0),
                BoundingBox::new(min_lat, -180.0, max_lat, max_lon),
            ]
        } else if max_lon > 180.0 {
            vec![
                BoundingBox::new(min_lat, min_lon, max_lat, 180.0),
                BoundingBox::new(min_lat, -180.0, max_lat, max_lon - 360.0),
            ]
        } else {
            vec![BoundingBox::new(min_lat, min_lon, max_lat, max_lon)]
        }
    }
}
