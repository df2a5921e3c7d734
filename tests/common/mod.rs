#![allow(dead_code)]

use bytes::Bytes;
use geo::Geometry;
use geoquery::geometry::{BoundingCircle, parse_wkt};
use geoquery::{
    CentroidRow, Config, DemographicRecord, EntityCache, EntityKind, GeoQueryError,
    GeoQueryService, MemoryCache, MemoryGeoIndex, MemorySpatialStore, Page, Point, Result,
    ServiceBuilder, SetOptions, SortSpec, SpatialEntity, SpatialStore, WithinPage,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn rect_wkt(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> String {
    format!(
        "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
        x0 = min_lon,
        y0 = min_lat,
        x1 = max_lon,
        y1 = max_lat
    )
}

pub fn region(id: &str, kind: EntityKind, name: &str, bounds: [f64; 4]) -> SpatialEntity {
    let [min_lon, min_lat, max_lon, max_lat] = bounds;
    SpatialEntity::new(
        id,
        kind,
        name,
        parse_wkt(&rect_wkt(min_lon, min_lat, max_lon, max_lat)).unwrap(),
    )
    .with_computed_centroid()
}

pub fn city(id: &str, name: &str, lon: f64, lat: f64, land_area: i64) -> SpatialEntity {
    let half = 0.004;
    region(id, EntityKind::City, name, [lon - half, lat - half, lon + half, lat + half])
        .with_group_name("California")
        .with_areas(land_area, land_area / 10)
        .with_centroid(Point::new(lat, lon))
}

/// Two states, three counties and six cities.
///
/// - state `06` California spans lon 0..10, lat 0..10
/// - state `32` Nevada spans lon 10..20, lat 0..10
/// - county `06037` spans lon 0..5, lat 0..5 and holds `c1`, `c2`, `c3`
/// - county `06001` spans lon 5..10, lat 5..10 and holds `c4`
/// - county `32` (same id as the Nevada state) spans lon 12..18, lat 2..8 and
///   holds `c5`
/// - `c6` lies in California outside every county
pub fn world() -> MemorySpatialStore {
    let store = MemorySpatialStore::new();
    let entities = vec![
        region("06", EntityKind::State, "California", [0.0, 0.0, 10.0, 10.0]),
        region("32", EntityKind::State, "Nevada", [10.0, 0.0, 20.0, 10.0]),
        region("06037", EntityKind::County, "Los Angeles County", [0.0, 0.0, 5.0, 5.0]),
        region("06001", EntityKind::County, "Alameda County", [5.0, 5.0, 10.0, 10.0]),
        region("32", EntityKind::County, "Clark County", [12.0, 2.0, 18.0, 8.0]),
        city("c1", "Alpha", 1.0, 1.0, 300),
        city("c2", "Bravo", 1.0, 1.01, 100),
        city("c3", "Charlie", 2.0, 2.0, 200),
        city("c4", "Delta", 7.0, 7.0, 50),
        city("c5", "Echo", 15.0, 5.0, 400).with_group_name("Nevada"),
        city("c6", "Foxtrot", 5.5, 2.5, 10),
    ];
    for entity in entities {
        store.insert(entity).unwrap();
    }

    for (id, year, population) in [
        ("06", 2021, 39_237_836),
        ("06", 2022, 39_029_342),
        ("06037", 2022, 9_721_138),
    ] {
        store
            .insert_demographic(
                DemographicRecord::new(id, year)
                    .with_field("total_population", population)
                    .with_field("median_household_income_past12months", 84_097),
            )
            .unwrap();
    }
    store
}

/// Store wrapper that counts calls, can hide ids from batched fetches and
/// can be switched into a failing state.
pub struct CountingStore {
    inner: MemorySpatialStore,
    pub fetch_calls: AtomicUsize,
    pub fetched_ids: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub within_calls: AtomicUsize,
    failing: AtomicBool,
    hidden: Mutex<HashSet<String>>,
}

impl CountingStore {
    pub fn new(inner: MemorySpatialStore) -> Self {
        Self {
            inner,
            fetch_calls: AtomicUsize::new(0),
            fetched_ids: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            within_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            hidden: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn hide(&self, id: &str) {
        self.hidden.lock().unwrap().insert(id.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GeoQueryError::unavailable("spatial store", "connection refused"));
        }
        Ok(())
    }
}

impl SpatialStore for CountingStore {
    fn find_containing(&self, point: &Point, kind: EntityKind) -> Result<Option<SpatialEntity>> {
        self.check()?;
        self.inner.find_containing(point, kind)
    }

    fn find_within(
        &self,
        container: &Geometry<f64>,
        kind: EntityKind,
        sort: SortSpec,
        page: Option<Page>,
    ) -> Result<WithinPage> {
        self.check()?;
        self.within_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_within(container, kind, sort, page)
    }

    fn fetch_by_ids(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<SpatialEntity>> {
        self.check()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_ids.fetch_add(ids.len(), Ordering::SeqCst);
        let hidden = self.hidden.lock().unwrap().clone();
        Ok(self
            .inner
            .fetch_by_ids(kind, ids)?
            .into_iter()
            .filter(|e| !hidden.contains(&e.id))
            .collect())
    }

    fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<SpatialEntity>> {
        self.check()?;
        self.inner.find_by_id(kind, id)
    }

    fn bounding_circle(&self, polygon_wkt: &str) -> Result<BoundingCircle> {
        self.check()?;
        self.inner.bounding_circle(polygon_wkt)
    }

    fn search_by_name_or_id(&self, kind: EntityKind, substring: &str) -> Result<Vec<SpatialEntity>> {
        self.check()?;
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search_by_name_or_id(kind, substring)
    }

    fn demographics_for(&self, entity_id: &str) -> Result<Vec<DemographicRecord>> {
        self.check()?;
        self.inner.demographics_for(entity_id)
    }

    fn centroid_batch(
        &self,
        kind: EntityKind,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CentroidRow>> {
        self.check()?;
        self.inner.centroid_batch(kind, after_id, limit)
    }
}

/// Cache whose every call fails.
pub struct FailingCache;

impl EntityCache for FailingCache {
    fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Err(GeoQueryError::unavailable("entity cache", "connection reset"))
    }

    fn set(&self, _key: &str, _payload: Bytes, _opts: Option<SetOptions>) -> Result<()> {
        Err(GeoQueryError::unavailable("entity cache", "connection reset"))
    }

    fn delete(&self, _key: &str) -> Result<bool> {
        Err(GeoQueryError::unavailable("entity cache", "connection reset"))
    }
}

pub struct Harness {
    pub service: GeoQueryService,
    pub store: Arc<CountingStore>,
    pub cache: Arc<MemoryCache>,
    pub index: Arc<MemoryGeoIndex>,
}

pub fn harness_with(config: Config) -> Harness {
    let store = Arc::new(CountingStore::new(world()));
    let cache = Arc::new(MemoryCache::new());
    let index = Arc::new(MemoryGeoIndex::new());
    let service = ServiceBuilder::new()
        .store(store.clone())
        .cache(cache.clone())
        .index(index.clone())
        .config(config)
        .load_index_on_build(true)
        .build()
        .unwrap();
    Harness {
        service,
        store,
        cache,
        index,
    }
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
    items.iter().map(|item| id(item).to_string()).collect()
}
