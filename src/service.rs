//! Query orchestration over the geo index, entity cache and spatial store
//!
//! Every operation validates its input before touching a backend, generates
//! an ordered candidate id list, windows it, and hydrates the window through
//! the cache with one batched store fetch for the misses.

use crate::approx::BoundingCircleApproximator;
use crate::cache::{self, CacheKeys, EntityCache};
use crate::error::{GeoQueryError, Result};
use crate::geometry;
use crate::index::GeoIndex;
use crate::loader::{BulkIndexLoader, LoadReport};
use crate::spatial::Point;
use crate::store::{SpatialEntity, SpatialStore};
use crate::types::{Config, EntityKind, Page, PolygonStrategy, SetOptions, SortField, SortOrder, SortSpec};
use crate::views::{
    BoundaryView, CityAreaView, CityView, DemographicsResponse, EncompassingResponse, EntityView,
    NearbyCity, NearbyResponse, Pagination, PolygonPagination, PolygonSearchResponse,
    RegionDemographics, RegionView, SearchHit,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kinds probed, in priority order, when resolving an unqualified id.
const PROBE_ORDER: [EntityKind; 3] = [EntityKind::State, EntityKind::County, EntityKind::City];

/// Answers geospatial queries. Cheap to clone; clones share the backends.
#[derive(Clone)]
pub struct GeoQueryService {
    index: Arc<dyn GeoIndex>,
    cache: Arc<dyn EntityCache>,
    store: Arc<dyn SpatialStore>,
    approximator: BoundingCircleApproximator,
    config: Config,
    keys: CacheKeys,
}

impl GeoQueryService {
    pub fn new(
        index: Arc<dyn GeoIndex>,
        cache: Arc<dyn EntityCache>,
        store: Arc<dyn SpatialStore>,
        config: Config,
    ) -> Self {
        Self {
            approximator: BoundingCircleApproximator::new(Arc::clone(&store)),
            keys: CacheKeys::new(config.cache_key_version),
            index,
            cache,
            store,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache_keys(&self) -> &CacheKeys {
        &self.keys
    }

    /// Cities within `radius_meters` of the point, nearest first.
    pub fn nearby_search(
        &self,
        lat: f64,
        lng: f64,
        radius_meters: f64,
        page: i64,
        limit: i64,
    ) -> Result<NearbyResponse> {
        let window = Page::new(page, limit)?;
        validate_radius(radius_meters)?;
        Point::checked(lat, lng)?;

        let candidates = self.index.radius_search(lat, lng, radius_meters)?;
        let total_count = candidates.len();
        let neighbors = window.slice(&candidates);

        let ids: Vec<String> = neighbors.iter().map(|n| n.id.clone()).collect();
        let cities: Vec<CityView> = self.hydrate(EntityKind::City, &ids)?;
        let nearby = cities
            .into_iter()
            .zip(neighbors)
            .map(|(city, neighbor)| NearbyCity::new(city, neighbor))
            .collect();

        Ok(NearbyResponse {
            latitude: lat,
            longitude: lng,
            radius: radius_meters,
            page: window.page,
            limit: window.limit,
            total_count,
            total_pages: window.total_pages(total_count),
            nearby,
        })
    }

    /// Cities within a WKT polygon, using the configured strategy unless
    /// `strategy` overrides it.
    ///
    /// The exact strategy orders by `sort_by`. The accelerated strategy uses
    /// the covering circle of the polygon and orders by distance from its
    /// center in the `sort_order` direction; its result is a superset of the
    /// exact answer and `sort_by` is only validated.
    pub fn polygon_search(
        &self,
        polygon_wkt: &str,
        page: i64,
        per_page: i64,
        sort_by: &str,
        sort_order: &str,
        strategy: Option<PolygonStrategy>,
    ) -> Result<PolygonSearchResponse> {
        let window = Page::new(page, per_page)?;
        let polygon = geometry::parse_polygon_wkt(polygon_wkt)?;
        let order: SortOrder = sort_order.parse()?;
        let field: SortField = sort_by.parse()?;
        let strategy = strategy.unwrap_or(self.config.polygon_strategy);

        let (total_cities, ids, bounding_circle) = match strategy {
            PolygonStrategy::Exact => {
                let within = self.store.find_within(
                    &polygon,
                    EntityKind::City,
                    SortSpec::new(field, order),
                    Some(window),
                )?;
                (within.total_count, within.ids, None)
            }
            PolygonStrategy::Accelerated => {
                let circle = self.approximator.approximate(polygon_wkt)?;
                let mut candidates = self.index.radius_search(
                    circle.center.lat,
                    circle.center.lon,
                    circle.radius_meters,
                )?;
                if order == SortOrder::Desc {
                    candidates.reverse();
                }
                let ids: Vec<String> = window.slice(&candidates).iter().map(|n| n.id.clone()).collect();
                (candidates.len(), ids, Some(circle))
            }
        };
        debug!(?strategy, total_cities, "polygon candidates");

        let cities: Vec<CityAreaView> = self.hydrate(EntityKind::City, &ids)?;
        Ok(PolygonSearchResponse {
            cities,
            pagination: PolygonPagination {
                page: window.page,
                per_page: window.limit,
                total_cities,
                total_pages: window.total_pages(total_cities),
            },
            strategy,
            bounding_circle,
        })
    }

    /// State and county containing the point, with boundaries and every
    /// demographic year. Overlapping polygons resolve to whichever the store
    /// returns first.
    pub fn demographics_at_point(
        &self,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> Result<DemographicsResponse> {
        let (Some(lat), Some(lng)) = (lat, lng) else {
            return Err(GeoQueryError::validation(
                "lat and lng query parameters are required",
            ));
        };
        let point = Point::checked(lat, lng)?;

        let state = self
            .store
            .find_containing(&point, EntityKind::State)?
            .ok_or_else(|| GeoQueryError::not_found("No state found for given coordinates"))?;
        let county = self
            .store
            .find_containing(&point, EntityKind::County)?
            .ok_or_else(|| GeoQueryError::not_found("No county found for given coordinates"))?;

        let state_boundary = self.boundary_of(&state)?;
        let county_boundary = self.boundary_of(&county)?;

        Ok(DemographicsResponse {
            state: RegionDemographics::new(state_boundary, self.store.demographics_for(&state.id)?),
            county: RegionDemographics::new(
                county_boundary,
                self.store.demographics_for(&county.id)?,
            ),
        })
    }

    /// Child regions lying within the entity `entity_id`: counties of a
    /// state, cities of a county. Cities have no children.
    ///
    /// `entity_id` may be qualified as `<kind>:<id>`; otherwise it is probed
    /// as a state, then a county, then a city.
    pub fn encompassing_boundaries(
        &self,
        entity_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<EncompassingResponse> {
        let window = Page::new(page, limit)?;
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(GeoQueryError::validation("an entity id is required"));
        }

        let parent = self.resolve_entity(entity_id)?;
        let child_kind = match parent.kind {
            EntityKind::State => EntityKind::County,
            EntityKind::County => EntityKind::City,
            EntityKind::City | EntityKind::ZipArea => {
                return Ok(EncompassingResponse {
                    encompassing_regions: Vec::new(),
                    pagination: Pagination {
                        page: window.page,
                        limit: window.limit,
                        total_count: 0,
                        total_pages: 0,
                    },
                    message: Some(match parent.kind {
                        EntityKind::City => "No encompassing boundaries for cities.".to_string(),
                        _ => "No encompassing boundaries for zip areas.".to_string(),
                    }),
                });
            }
        };

        let within =
            self.store
                .find_within(&parent.geometry, child_kind, SortSpec::default(), Some(window))?;
        let regions: Vec<BoundaryView> = self.hydrate(child_kind, &within.ids)?;

        Ok(EncompassingResponse {
            encompassing_regions: regions.into_iter().map(RegionView::from).collect(),
            pagination: Pagination {
                page: window.page,
                limit: window.limit,
                total_count: within.total_count,
                total_pages: window.total_pages(within.total_count),
            },
            message: None,
        })
    }

    /// States or counties whose name or id contains `query`, ignoring case.
    /// Results are cached for the configured search TTL.
    pub fn search_by_name_or_id(&self, kind: &str, query: &str) -> Result<Vec<SearchHit>> {
        let kind: EntityKind = kind.parse()?;
        if !matches!(kind, EntityKind::State | EntityKind::County) {
            return Err(GeoQueryError::validation(
                "kind must be 'state' or 'county'",
            ));
        }
        let normalized = cache::normalize_query(query);
        let key = self.keys.search(kind, &normalized);

        if let Some(hits) = cache::get_json::<Vec<SearchHit>>(self.cache.as_ref(), &key)? {
            debug!(%kind, query = %normalized, "search cache hit");
            return Ok(hits);
        }

        let mut hits = self
            .store
            .search_by_name_or_id(kind, &normalized)?
            .iter()
            .map(SearchHit::from_entity)
            .collect::<Result<Vec<_>>>()?;
        hits.sort_by(|a, b| a.id.cmp(&b.id));

        cache::set_json(
            self.cache.as_ref(),
            &key,
            &hits,
            Some(SetOptions::with_ttl(self.config.search_cache_ttl())),
        )?;
        debug!(%kind, query = %normalized, matches = hits.len(), "search cached");
        Ok(hits)
    }

    /// Load every city centroid into the geo index, returning how many
    /// entries were indexed.
    pub fn bulk_index_load(&self) -> Result<usize> {
        Ok(self.index_loader().load()?.indexed)
    }

    pub fn index_loader(&self) -> BulkIndexLoader {
        BulkIndexLoader::new(Arc::clone(&self.store), Arc::clone(&self.index))
            .with_batch_size(self.config.index_batch_size)
    }

    /// Full load report for the city index.
    pub fn reload_index(&self) -> Result<LoadReport> {
        self.index_loader().load()
    }

    /// Drop every cached view of one entity so the next read recomputes it
    /// from the store. Returns how many keys were removed.
    pub fn invalidate_entity(&self, kind: EntityKind, id: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys.entity_keys(kind, id) {
            if self.cache.delete(&key)? {
                removed += 1;
            }
        }
        info!(%kind, id, removed, "invalidated cached views");
        Ok(removed)
    }

    /// Resolve ids through the cache, fetching every miss from the store in
    /// a single call and writing it back without expiry. Output order
    /// follows `ids`; any id left unresolved fails the whole request.
    fn hydrate<V: EntityView>(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<V>> {
        let mut resolved: FxHashMap<&str, V> = FxHashMap::default();
        let mut misses: Vec<String> = Vec::new();

        for id in ids {
            if resolved.contains_key(id.as_str()) || misses.contains(id) {
                continue;
            }
            let key = V::cache_key(&self.keys, kind, id);
            match cache::get_json::<V>(self.cache.as_ref(), &key)? {
                Some(view) => {
                    resolved.insert(id.as_str(), view);
                }
                None => misses.push(id.clone()),
            }
        }
        let hits = resolved.len();

        if !misses.is_empty() {
            let entities = self.store.fetch_by_ids(kind, &misses)?;
            for entity in &entities {
                let Some(id) = ids.iter().find(|id| **id == entity.id) else {
                    continue;
                };
                let view = V::from_entity(entity)?;
                cache::set_json(
                    self.cache.as_ref(),
                    &V::cache_key(&self.keys, kind, &entity.id),
                    &view,
                    None,
                )?;
                resolved.insert(id.as_str(), view);
            }
        }
        debug!(%kind, requested = ids.len(), hits, misses = misses.len(), "hydrated window");

        ids.iter()
            .map(|id| {
                resolved.get(id.as_str()).cloned().ok_or_else(|| {
                    warn!(%kind, id = %id, "candidate missing from spatial store");
                    GeoQueryError::internal(format!("{} '{}' could not be hydrated", kind, id))
                })
            })
            .collect()
    }

    fn boundary_of(&self, entity: &SpatialEntity) -> Result<BoundaryView> {
        let key = BoundaryView::cache_key(&self.keys, entity.kind, &entity.id);
        if let Some(view) = cache::get_json::<BoundaryView>(self.cache.as_ref(), &key)? {
            return Ok(view);
        }
        let view = BoundaryView::from_entity(entity)?;
        cache::set_json(self.cache.as_ref(), &key, &view, None)?;
        Ok(view)
    }

    fn resolve_entity(&self, entity_id: &str) -> Result<SpatialEntity> {
        if let Some((prefix, id)) = entity_id.split_once(':') {
            if let Ok(kind) = prefix.parse::<EntityKind>() {
                return self.store.find_by_id(kind, id)?.ok_or_else(|| {
                    GeoQueryError::not_found(format!("No {} found for id {}", kind, id))
                });
            }
        }

        let mut matches = Vec::new();
        for kind in PROBE_ORDER {
            if let Some(entity) = self.store.find_by_id(kind, entity_id)? {
                if !self.config.strict_kind_resolution {
                    return Ok(entity);
                }
                matches.push(entity);
            }
        }

        match matches.len() {
            0 => Err(GeoQueryError::not_found(format!(
                "No regions found for id {}",
                entity_id
            ))),
            1 => Ok(matches.remove(0)),
            _ => {
                let kinds: Vec<&str> = matches.iter().map(|e| e.kind.as_str()).collect();
                Err(GeoQueryError::validation(format!(
                    "id {} matches several kinds ({}); qualify it as <kind>:{}",
                    entity_id,
                    kinds.join(", "),
                    entity_id
                )))
            }
        }
    }
}

fn validate_radius(radius_meters: f64) -> Result<()> {
    if !radius_meters.is_finite() || radius_meters < 0.0 {
        return Err(GeoQueryError::validation(
            "radius must be a non-negative number of meters",
        ));
    }
    Ok(())
}
