//! Spatial store abstraction
//!
//! The spatial store is the durable source of truth: exact geometries,
//! attributes and demographic records. The query service only reads from it.
//! [`MemorySpatialStore`] is the in-process reference adapter used by tests,
//! benchmarks and the demo binary.

use crate::error::{GeoQueryError, Result};
use crate::geometry::{self, BoundingCircle, portable_serde};
use crate::spatial::Point;
use crate::types::{EntityKind, Page, SortField, SortOrder, SortSpec};
use geo::Geometry;
use rstar::{AABB, RTree, RTreeObject};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// A geographic entity (city, state, county or zip area).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialEntity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    /// Name of the enclosing state, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Land area in square meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_area: Option<i64>,
    /// Water area in square meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_area: Option<i64>,
    #[serde(with = "portable_serde")]
    pub geometry: Geometry<f64>,
    /// Required for geo index membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Point>,
}

impl SpatialEntity {
    pub fn new(
        id: impl Into<String>,
        kind: EntityKind,
        name: impl Into<String>,
        geometry: Geometry<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            group_name: None,
            land_area: None,
            water_area: None,
            geometry,
            centroid: None,
        }
    }

    pub fn with_group_name(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    pub fn with_areas(mut self, land_area: i64, water_area: i64) -> Self {
        self.land_area = Some(land_area);
        self.water_area = Some(water_area);
        self
    }

    pub fn with_centroid(mut self, centroid: Point) -> Self {
        self.centroid = Some(centroid);
        self
    }

    /// Set the centroid from the geometry itself.
    pub fn with_computed_centroid(mut self) -> Self {
        self.centroid = geometry::centroid(&self.geometry);
        self
    }
}

/// One year of demographic data for a state or county.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicRecord {
    pub entity_id: String,
    pub year: i32,
    /// Named numeric or text fields (population, income, ...)
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl DemographicRecord {
    pub fn new(entity_id: impl Into<String>, year: i32) -> Self {
        Self {
            entity_id: entity_id.into(),
            year,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// One page of a within-query plus the size of the full match set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithinPage {
    pub total_count: usize,
    pub ids: Vec<String>,
}

/// Centroid row fed to the index loader. Coordinates may be missing in
/// source data.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidRow {
    pub id: String,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

/// Read interface of the durable spatial store.
pub trait SpatialStore: Send + Sync {
    /// First entity of `kind` whose geometry contains `point`. When polygons
    /// overlap, which one is returned is unspecified.
    fn find_containing(&self, point: &Point, kind: EntityKind) -> Result<Option<SpatialEntity>>;

    /// Entities of `kind` lying within `container`, ordered by `sort` (ties
    /// broken by id), windowed by `page` when given.
    fn find_within(
        &self,
        container: &Geometry<f64>,
        kind: EntityKind,
        sort: SortSpec,
        page: Option<Page>,
    ) -> Result<WithinPage>;

    /// Entities of `kind` with the given ids. Unknown ids are omitted.
    fn fetch_by_ids(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<SpatialEntity>>;

    fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<SpatialEntity>>;

    /// Covering circle of a polygon given as WKT.
    fn bounding_circle(&self, polygon_wkt: &str) -> Result<BoundingCircle>;

    /// Entities whose name or id contains `substring`, case-insensitively.
    fn search_by_name_or_id(&self, kind: EntityKind, substring: &str)
    -> Result<Vec<SpatialEntity>>;

    /// Every demographic record for the entity, all years.
    fn demographics_for(&self, entity_id: &str) -> Result<Vec<DemographicRecord>>;

    /// Up to `limit` entities of `kind` having a centroid, ordered by id and
    /// starting strictly after `after_id`.
    fn centroid_batch(
        &self,
        kind: EntityKind,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CentroidRow>>;
}

/// Serialized contents of a [`MemorySpatialStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreFixture {
    #[serde(default)]
    pub entities: Vec<SpatialEntity>,
    #[serde(default)]
    pub demographics: Vec<DemographicRecord>,
}

#[derive(Debug, Clone, PartialEq)]
struct EntityEnvelope {
    id: String,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for EntityEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

fn envelope_of(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    geometry::bounding_box(geometry).map(|bbox| {
        let (min, max) = bbox.corners();
        AABB::from_corners(min, max)
    })
}

#[derive(Default)]
struct KindTable {
    entities: BTreeMap<String, SpatialEntity>,
    envelopes: RTree<EntityEnvelope>,
}

impl KindTable {
    fn insert(&mut self, entity: SpatialEntity) {
        if let Some(old) = self.entities.remove(&entity.id) {
            if let Some(aabb) = envelope_of(&old.geometry) {
                self.envelopes.remove(&EntityEnvelope {
                    id: old.id.clone(),
                    aabb,
                });
            }
        }
        if let Some(aabb) = envelope_of(&entity.geometry) {
            self.envelopes.insert(EntityEnvelope {
                id: entity.id.clone(),
                aabb,
            });
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Entities whose envelope intersects `aabb`, in id order.
    fn candidates(&self, aabb: &AABB<[f64; 2]>) -> Vec<&SpatialEntity> {
        let mut ids: Vec<&str> = self
            .envelopes
            .locate_in_envelope_intersecting(aabb)
            .map(|e| e.id.as_str())
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.entities.get(id))
            .collect()
    }
}

#[derive(Default)]
struct StoreInner {
    tables: FxHashMap<EntityKind, KindTable>,
    demographics: FxHashMap<String, Vec<DemographicRecord>>,
}

impl StoreInner {
    fn table(&self, kind: EntityKind) -> Option<&KindTable> {
        self.tables.get(&kind)
    }
}

fn compare_by(sort: SortSpec, a: &SpatialEntity, b: &SpatialEntity) -> Ordering {
    let primary = match sort.field {
        SortField::Name => a.name.cmp(&b.name),
        SortField::Id => Ordering::Equal,
        SortField::LandArea => a.land_area.cmp(&b.land_area),
        SortField::WaterArea => a.water_area.cmp(&b.water_area),
        SortField::StateName => a.group_name.cmp(&b.group_name),
    };
    let primary = match sort.order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    let by_id = match (sort.field, sort.order) {
        (SortField::Id, SortOrder::Desc) => b.id.cmp(&a.id),
        _ => a.id.cmp(&b.id),
    };
    primary.then(by_id)
}

/// In-process spatial store with R-tree envelope pruning and exact `geo`
/// predicates.
#[derive(Default)]
pub struct MemorySpatialStore {
    inner: RwLock<StoreInner>,
}

impl MemorySpatialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: StoreFixture) -> Result<Self> {
        let store = Self::new();
        for entity in fixture.entities {
            store.insert(entity)?;
        }
        for record in fixture.demographics {
            store.insert_demographic(record)?;
        }
        Ok(store)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let fixture: StoreFixture = serde_json::from_str(text)
            .map_err(|e| GeoQueryError::validation(format!("store fixture: {}", e)))?;
        Self::from_fixture(fixture)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GeoQueryError::unavailable("spatial store", format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Add or replace an entity.
    pub fn insert(&self, entity: SpatialEntity) -> Result<()> {
        let mut inner = self.write()?;
        inner.tables.entry(entity.kind).or_default().insert(entity);
        Ok(())
    }

    pub fn insert_demographic(&self, record: DemographicRecord) -> Result<()> {
        let mut inner = self.write()?;
        let records = inner
            .demographics
            .entry(record.entity_id.clone())
            .or_default();
        records.retain(|r| r.year != record.year);
        records.push(record);
        records.sort_by_key(|r| r.year);
        Ok(())
    }

    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        Ok(self
            .read()?
            .table(kind)
            .map(|t| t.entities.len())
            .unwrap_or(0))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| GeoQueryError::unavailable("spatial store", "read lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| GeoQueryError::unavailable("spatial store", "write lock poisoned"))
    }
}

impl SpatialStore for MemorySpatialStore {
    fn find_containing(&self, point: &Point, kind: EntityKind) -> Result<Option<SpatialEntity>> {
        let inner = self.read()?;
        let Some(table) = inner.table(kind) else {
            return Ok(None);
        };
        let probe = AABB::from_point([point.lon, point.lat]);
        Ok(table
            .candidates(&probe)
            .into_iter()
            .find(|e| geometry::contains_point(&e.geometry, point))
            .cloned())
    }

    fn find_within(
        &self,
        container: &Geometry<f64>,
        kind: EntityKind,
        sort: SortSpec,
        page: Option<Page>,
    ) -> Result<WithinPage> {
        let inner = self.read()?;
        let (Some(table), Some(aabb)) = (inner.table(kind), envelope_of(container)) else {
            return Ok(WithinPage {
                total_count: 0,
                ids: Vec::new(),
            });
        };

        let mut matches: Vec<&SpatialEntity> = table
            .candidates(&aabb)
            .into_iter()
            .filter(|e| geometry::is_within(&e.geometry, container))
            .collect();
        matches.sort_by(|a, b| compare_by(sort, a, b));

        let total_count = matches.len();
        let window = match page {
            Some(page) => page.slice(&matches),
            None => &matches[..],
        };
        debug!(%kind, total_count, returned = window.len(), "within query");
        Ok(WithinPage {
            total_count,
            ids: window.iter().map(|e| e.id.clone()).collect(),
        })
    }

    fn fetch_by_ids(&self, kind: EntityKind, ids: &[String]) -> Result<Vec<SpatialEntity>> {
        let inner = self.read()?;
        let Some(table) = inner.table(kind) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| table.entities.get(id))
            .cloned()
            .collect())
    }

    fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<SpatialEntity>> {
        let inner = self.read()?;
        Ok(inner.table(kind).and_then(|t| t.entities.get(id)).cloned())
    }

    fn bounding_circle(&self, polygon_wkt: &str) -> Result<BoundingCircle> {
        let polygon = geometry::parse_polygon_wkt(polygon_wkt)?;
        BoundingCircle::covering(&polygon)
    }

    fn search_by_name_or_id(
        &self,
        kind: EntityKind,
        substring: &str,
    ) -> Result<Vec<SpatialEntity>> {
        let needle = substring.to_lowercase();
        let inner = self.read()?;
        let Some(table) = inner.table(kind) else {
            return Ok(Vec::new());
        };
        Ok(table
            .entities
            .values()
            .filter(|e| {
                e.name.to_lowercase().contains(&needle) || e.id.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    fn demographics_for(&self, entity_id: &str) -> Result<Vec<DemographicRecord>> {
        Ok(self
            .read()?
            .demographics
            .get(entity_id)
            .cloned()
            .unwrap_or_default())
    }

    fn centroid_batch(
        &self,
        kind: EntityKind,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CentroidRow>> {
        let inner = self.read()?;
        let Some(table) = inner.table(kind) else {
            return Ok(Vec::new());
        };
        let lower = match after_id {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let rows = table
            .entities
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(_, e)| e)
            .filter_map(|e| {
                e.centroid.map(|c| CentroidRow {
                    id: e.id.clone(),
                    lon: Some(c.lon),
                    lat: Some(c.lat),
                })
            })
            .take(limit)
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_wkt;

    fn square(id: &str, kind: EntityKind, min_x: f64, min_y: f64, size: f64) -> SpatialEntity {
        let wkt = format!(
            "POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
            x0 = min_x,
            y0 = min_y,
            x1 = min_x + size,
            y1 = min_y + size
        );
        SpatialEntity::new(id, kind, id.to_uppercase(), parse_wkt(&wkt).unwrap())
            .with_computed_centroid()
    }

    fn sample_store() -> MemorySpatialStore {
        let store = MemorySpatialStore::new();
        store.insert(square("st1", EntityKind::State, 0.0, 0.0, 10.0)).unwrap();
        store.insert(square("co1", EntityKind::County, 0.0, 0.0, 5.0)).unwrap();
        store.insert(square("co2", EntityKind::County, 5.0, 5.0, 5.0)).unwrap();
        store.insert(square("co3", EntityKind::County, 20.0, 20.0, 5.0)).unwrap();
        store
    }

    #[test]
    fn test_find_containing() {
        let store = sample_store();
        let hit = store
            .find_containing(&Point::new(7.0, 7.0), EntityKind::County)
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, "co2");
        assert!(store
            .find_containing(&Point::new(15.0, 15.0), EntityKind::County)
            .unwrap()
            .is_none());
        assert!(store
            .find_containing(&Point::new(1.0, 1.0), EntityKind::City)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_find_within_sorted_and_windowed() {
        let store = sample_store();
        let state = store.find_by_id(EntityKind::State, "st1").unwrap().unwrap();
        let desc = SortSpec::new(SortField::Id, SortOrder::Desc);

        let all = store
            .find_within(&state.geometry, EntityKind::County, desc, None)
            .unwrap();
        assert_eq!(all.total_count, 2);
        assert_eq!(all.ids, vec!["co2", "co1"]);

        let page = store
            .find_within(
                &state.geometry,
                EntityKind::County,
                desc,
                Some(Page::new(2, 1).unwrap()),
            )
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.ids, vec!["co1"]);
    }

    #[test]
    fn test_sort_ties_broken_by_id() {
        let store = MemorySpatialStore::new();
        for id in ["c", "a", "b"] {
            store
                .insert(square(id, EntityKind::City, 1.0, 1.0, 0.5).with_areas(100, 0))
                .unwrap();
        }
        let container = parse_wkt("POLYGON((0 0, 5 0, 5 5, 0 5, 0 0))").unwrap();
        for order in [SortOrder::Asc, SortOrder::Desc] {
            let page = store
                .find_within(
                    &container,
                    EntityKind::City,
                    SortSpec::new(SortField::LandArea, order),
                    None,
                )
                .unwrap();
            assert_eq!(page.ids, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn test_search_by_name_or_id() {
        let store = sample_store();
        let hits = store.search_by_name_or_id(EntityKind::County, "CO").unwrap();
        assert_eq!(hits.len(), 3);
        let hits = store.search_by_name_or_id(EntityKind::County, "o2").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "co2");
    }

    #[test]
    fn test_centroid_batches() {
        let store = sample_store();
        store
            .insert(SpatialEntity::new(
                "co0",
                EntityKind::County,
                "No centroid",
                parse_wkt("POINT(1 1)").unwrap(),
            ))
            .unwrap();

        let first = store.centroid_batch(EntityKind::County, None, 2).unwrap();
        let ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["co1", "co2"]);

        let rest = store
            .centroid_batch(EntityKind::County, Some("co2"), 2)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "co3");

        // The cursor need not be a stored id.
        let resumed = store
            .centroid_batch(EntityKind::County, Some("co1x"), 10)
            .unwrap();
        let ids: Vec<&str> = resumed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["co2", "co3"]);
        assert!(store
            .centroid_batch(EntityKind::County, Some("co3"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_demographics_replace_same_year() {
        let store = MemorySpatialStore::new();
        store
            .insert_demographic(DemographicRecord::new("st1", 2021).with_field("total_population", 10))
            .unwrap();
        store
            .insert_demographic(DemographicRecord::new("st1", 2020).with_field("total_population", 9))
            .unwrap();
        store
            .insert_demographic(DemographicRecord::new("st1", 2021).with_field("total_population", 11))
            .unwrap();

        let records = store.demographics_for("st1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].year, 2020);
        assert_eq!(records[1].fields["total_population"], 11);
        assert!(store.demographics_for("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_fixture_json() {
        let text = r#"{
            "entities": [{
                "id": "st9", "kind": "state", "name": "Nine",
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}
            }],
            "demographics": [{"entity_id": "st9", "year": 2022, "median_household_income": "71000"}]
        }"#;
        let store = MemorySpatialStore::from_json_str(text).unwrap();
        assert_eq!(store.count(EntityKind::State).unwrap(), 1);
        let records = store.demographics_for("st9").unwrap();
        assert_eq!(records[0].fields["median_household_income"], "71000");
    }
}
