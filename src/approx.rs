//! Polygon to covering-circle reduction for accelerated polygon search

use crate::error::{GeoQueryError, Result};
use crate::geometry::BoundingCircle;
use crate::store::SpatialStore;
use std::sync::Arc;
use tracing::debug;

/// Reduces a polygon to a circle that covers it, so a radius search over the
/// geo index can generate polygon candidates.
///
/// Every point of the polygon lies inside the circle, but the circle may also
/// contain points outside the polygon: candidates derived from it are a
/// superset of the exact answer.
#[derive(Clone)]
pub struct BoundingCircleApproximator {
    store: Arc<dyn SpatialStore>,
}

impl BoundingCircleApproximator {
    pub fn new(store: Arc<dyn SpatialStore>) -> Self {
        Self { store }
    }

    /// Covering circle of a polygon given as WKT. The geometry functions of
    /// the spatial store do the work.
    pub fn approximate(&self, polygon_wkt: &str) -> Result<BoundingCircle> {
        let circle = self.store.bounding_circle(polygon_wkt)?;
        if !circle.radius_meters.is_finite() || circle.radius_meters < 0.0 {
            return Err(GeoQueryError::internal(format!(
                "store returned an invalid covering radius {}",
                circle.radius_meters
            )));
        }
        debug!(
            center = %circle.center,
            radius_meters = circle.radius_meters,
            "approximated polygon"
        );
        Ok(circle)
    }
}
