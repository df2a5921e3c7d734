//! Materialized views and operation responses
//!
//! Each cached view kind has a fixed record type. A view is a pure function
//! of one [`SpatialEntity`], so recomputing it from the store is always safe.

use crate::cache::CacheKeys;
use crate::error::Result;
use crate::geometry::{BoundingCircle, PortableGeometry};
use crate::index::Neighbor;
use crate::store::{DemographicRecord, SpatialEntity};
use crate::types::{EntityKind, PolygonStrategy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record type that can be derived from an entity and cached under a
/// deterministic key.
pub trait EntityView: Serialize + DeserializeOwned + Clone {
    fn cache_key(keys: &CacheKeys, kind: EntityKind, id: &str) -> String;

    fn from_entity(entity: &SpatialEntity) -> Result<Self>;
}

/// City position view served by nearby search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityView {
    pub name: String,
    pub id: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub geometry: PortableGeometry,
}

impl EntityView for CityView {
    fn cache_key(keys: &CacheKeys, _kind: EntityKind, id: &str) -> String {
        keys.city_position(id)
    }

    fn from_entity(entity: &SpatialEntity) -> Result<Self> {
        Ok(Self {
            name: entity.name.clone(),
            id: entity.id.clone(),
            lat: entity.centroid.map(|c| c.lat),
            lng: entity.centroid.map(|c| c.lon),
            geometry: PortableGeometry::from_geo(&entity.geometry)?,
        })
    }
}

/// City summary view served by polygon search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityAreaView {
    pub name: String,
    pub id: String,
    pub state_name: Option<String>,
    pub land_area: Option<i64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl EntityView for CityAreaView {
    fn cache_key(keys: &CacheKeys, _kind: EntityKind, id: &str) -> String {
        keys.city_area(id)
    }

    fn from_entity(entity: &SpatialEntity) -> Result<Self> {
        Ok(Self {
            name: entity.name.clone(),
            id: entity.id.clone(),
            state_name: entity.group_name.clone(),
            land_area: entity.land_area,
            lat: entity.centroid.map(|c| c.lat),
            lng: entity.centroid.map(|c| c.lon),
        })
    }
}

/// Boundary geometry of a state, county or city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryView {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub geometry: PortableGeometry,
}

impl EntityView for BoundaryView {
    fn cache_key(keys: &CacheKeys, kind: EntityKind, id: &str) -> String {
        keys.boundary(kind, id)
    }

    fn from_entity(entity: &SpatialEntity) -> Result<Self> {
        Ok(Self {
            id: entity.id.clone(),
            kind: entity.kind,
            name: entity.name.clone(),
            geometry: PortableGeometry::from_geo(&entity.geometry)?,
        })
    }
}

/// One free-text search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub id: String,
    pub geometry: PortableGeometry,
}

impl SearchHit {
    pub fn from_entity(entity: &SpatialEntity) -> Result<Self> {
        Ok(Self {
            name: entity.name.clone(),
            id: entity.id.clone(),
            geometry: PortableGeometry::from_geo(&entity.geometry)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyCity {
    #[serde(flatten)]
    pub city: CityView,
    pub distance: f64,
}

impl NearbyCity {
    pub fn new(city: CityView, neighbor: &Neighbor) -> Self {
        Self {
            city,
            distance: neighbor.distance_meters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub page: u32,
    pub limit: u32,
    pub total_count: usize,
    pub total_pages: usize,
    pub nearby: Vec<NearbyCity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonPagination {
    pub page: u32,
    pub per_page: u32,
    pub total_cities: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonSearchResponse {
    pub cities: Vec<CityAreaView>,
    pub pagination: PolygonPagination,
    pub strategy: PolygonStrategy,
    /// Present only when the accelerated strategy generated the candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_circle: Option<BoundingCircle>,
}

/// A containing region with its boundary and every demographic year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDemographics {
    pub id: String,
    pub name: String,
    pub geometry: PortableGeometry,
    pub demographics: Vec<DemographicRecord>,
}

impl RegionDemographics {
    pub fn new(boundary: BoundaryView, demographics: Vec<DemographicRecord>) -> Self {
        Self {
            id: boundary.id,
            name: boundary.name,
            geometry: boundary.geometry,
            demographics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicsResponse {
    pub state: RegionDemographics,
    pub county: RegionDemographics,
}

/// A child region, tagged with its kind label ("County", "City").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub geometry: PortableGeometry,
}

impl From<BoundaryView> for RegionView {
    fn from(boundary: BoundaryView) -> Self {
        Self {
            name: boundary.name,
            kind: boundary.kind.label().to_string(),
            id: boundary.id,
            geometry: boundary.geometry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_count: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncompassingResponse {
    pub encompassing_regions: Vec<RegionView>,
    pub pagination: Pagination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
