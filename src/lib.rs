//! # geoquery - cache-aside geospatial query orchestration
//!
//! `geoquery` answers geospatial lookups (nearest cities to a point, cities
//! within a polygon, regions contained by a boundary, name search and
//! demographics at a point) over three shared backends:
//!
//! - a [`GeoIndex`] answering radius searches ordered by distance,
//! - an [`EntityCache`] of materialized per-entity views,
//! - a [`SpatialStore`] holding exact geometries and demographic records.
//!
//! The store is the source of truth. The index may lag it but never holds
//! entries the store lacks, and cached views are pure functions of store
//! state, so concurrent requests may recompute and overwrite them freely.
//!
//! ## Quick Start
//!
//! ```rust
//! use geoquery::{EntityKind, MemorySpatialStore, Point, ServiceBuilder, SpatialEntity};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemorySpatialStore::new();
//! store.insert(
//!     SpatialEntity::new(
//!         "0644000",
//!         EntityKind::City,
//!         "Los Angeles",
//!         geoquery::geometry::parse_wkt("POINT(-118.24 34.05)")?,
//!     )
//!     .with_centroid(Point::new(34.05, -118.24)),
//! )?;
//!
//! let service = ServiceBuilder::new()
//!     .store(Arc::new(store))
//!     .load_index_on_build(true)
//!     .build()?;
//!
//! let nearby = service.nearby_search(34.05, -118.25, 5_000.0, 1, 10)?;
//! assert_eq!(nearby.total_count, 1);
//! assert_eq!(nearby.nearby[0].city.name, "Los Angeles");
//! # Ok(())
//! # }
//! ```
//!
//! ## Polygon search strategies
//!
//! [`PolygonStrategy::Exact`] (the default) asks the store for cities within
//! the polygon, giving exact counts and ordering by the requested column.
//! [`PolygonStrategy::Accelerated`] reduces the polygon to a covering circle
//! and reuses the index's radius search: faster, but the candidate set is a
//! superset of the exact answer and is ordered by distance from the circle's
//! center. Responses always name the strategy used.

pub mod approx;
pub mod builder;
pub mod cache;
pub mod error;
pub mod geometry;
pub mod index;
pub mod loader;
pub mod service;
pub mod spatial;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod views;

pub use approx::BoundingCircleApproximator;
pub use builder::ServiceBuilder;
pub use cache::{CacheKeys, CacheStats, EntityCache, MemoryCache};
pub use error::{GeoQueryError, Result};
pub use geometry::{BoundingCircle, PortableGeometry};
pub use index::{BatchOutcome, GeoIndex, IndexEntry, MemoryGeoIndex, Neighbor};
pub use loader::{BulkIndexLoader, LoadReport};
pub use service::GeoQueryService;
pub use spatial::{BoundingBox, Point};
pub use store::{
    CentroidRow, DemographicRecord, MemorySpatialStore, SpatialEntity, SpatialStore, StoreFixture,
    WithinPage,
};
pub use types::{
    Config, EntityKind, Page, PolygonStrategy, SetOptions, SortField, SortOrder, SortSpec,
};
pub use views::{
    BoundaryView, CityAreaView, CityView, DemographicsResponse, EncompassingResponse, NearbyCity,
    NearbyResponse, Pagination, PolygonPagination, PolygonSearchResponse, RegionDemographics,
    RegionView, SearchHit,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        Config, EntityKind, GeoQueryError, GeoQueryService, MemoryCache, MemoryGeoIndex,
        MemorySpatialStore, Point, PolygonStrategy, Result, ServiceBuilder, SpatialEntity,
    };
}
