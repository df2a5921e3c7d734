use crate::error::{GeoQueryError, Result};
use crate::spatial::{BoundingBox, Point};
use rstar::{AABB, RTree, RTreeObject};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Position of one entity in the geo index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub lon: f64,
    pub lat: f64,
}

impl IndexEntry {
    pub fn new(id: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            id: id.into(),
            lon,
            lat,
        }
    }
}

/// A radius search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub distance_meters: f64,
}

/// Result of applying one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub skipped: usize,
}

/// Geospatial index mapping entity id to (longitude, latitude).
///
/// Implementations must be safe for concurrent readers and writers without
/// external locking.
pub trait GeoIndex: Send + Sync {
    /// Add or replace the position of `id`.
    fn upsert(&self, id: &str, lon: f64, lat: f64) -> Result<()>;

    /// Apply many upserts as one unit. Entries with missing or non-numeric
    /// coordinates are skipped without failing the batch.
    fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<BatchOutcome>;

    /// Ids within `radius_meters` of the point, nearest first.
    fn radius_search(&self, lat: f64, lng: f64, radius_meters: f64) -> Result<Vec<Neighbor>>;

    /// Number of indexed entities.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A wrapper for positions stored in the R-tree
#[derive(Debug, Clone, PartialEq)]
struct IndexedPosition {
    id: String,
    coords: [f64; 2],
}

impl RTreeObject for IndexedPosition {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coords)
    }
}

#[derive(Default)]
struct IndexInner {
    tree: RTree<IndexedPosition>,
    positions: FxHashMap<String, [f64; 2]>,
}

impl IndexInner {
    fn replace(&mut self, id: String, coords: [f64; 2]) {
        if let Some(old) = self.positions.insert(id.clone(), coords) {
            self.tree.remove(&IndexedPosition {
                id: id.clone(),
                coords: old,
            });
        }
        self.tree.insert(IndexedPosition { id, coords });
    }
}

/// In-process geo index backed by an R-tree over `[lon, lat]`.
#[derive(Default)]
pub struct MemoryGeoIndex {
    inner: RwLock<IndexInner>,
}

fn checked_coords(lon: f64, lat: f64) -> Option<[f64; 2]> {
    Point::checked(lat, lon).ok().map(|_| [lon, lat])
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries ordered by id.
    pub fn snapshot(&self) -> Result<Vec<IndexEntry>> {
        let inner = self.read()?;
        let mut entries: Vec<IndexEntry> = inner
            .positions
            .iter()
            .map(|(id, c)| IndexEntry::new(id.clone(), c[0], c[1]))
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        *inner = IndexInner::default();
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexInner>> {
        self.inner
            .read()
            .map_err(|_| GeoQueryError::unavailable("geo index", "read lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexInner>> {
        self.inner
            .write()
            .map_err(|_| GeoQueryError::unavailable("geo index", "write lock poisoned"))
    }
}

impl GeoIndex for MemoryGeoIndex {
    fn upsert(&self, id: &str, lon: f64, lat: f64) -> Result<()> {
        let coords = checked_coords(lon, lat).ok_or_else(|| {
            GeoQueryError::validation(format!("invalid coordinates for '{}'", id))
        })?;
        self.write()?.replace(id.to_string(), coords);
        Ok(())
    }

    fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<BatchOutcome> {
        let mut staged: FxHashMap<String, [f64; 2]> = FxHashMap::default();
        let mut outcome = BatchOutcome::default();

        for entry in entries {
            match checked_coords(entry.lon, entry.lat) {
                Some(coords) => {
                    staged.insert(entry.id.clone(), coords);
                }
                None => {
                    debug!(id = %entry.id, lon = entry.lon, lat = entry.lat, "skipping malformed index entry");
                    outcome.skipped += 1;
                }
            }
        }
        if outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "index batch contained malformed entries");
        }
        outcome.applied = staged.len();

        let mut inner = self.write()?;
        if inner.positions.is_empty() {
            let items = staged
                .iter()
                .map(|(id, coords)| IndexedPosition {
                    id: id.clone(),
                    coords: *coords,
                })
                .collect();
            inner.tree = RTree::bulk_load(items);
            inner.positions = staged;
        } else {
            for (id, coords) in staged {
                inner.replace(id, coords);
            }
        }

        Ok(outcome)
    }

    fn radius_search(&self, lat: f64, lng: f64, radius_meters: f64) -> Result<Vec<Neighbor>> {
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return Err(GeoQueryError::validation(
                "radius must be a non-negative number of meters",
            ));
        }
        let center = Point::checked(lat, lng)?;

        let inner = self.read()?;
        let mut hits = Vec::new();
        for bbox in BoundingBox::covering_radius(&center, radius_meters) {
            let (min, max) = bbox.corners();
            for item in inner.tree.locate_in_envelope(&AABB::from_corners(min, max)) {
                let distance = center.distance_to(&Point::new(item.coords[1], item.coords[0]));
                if distance <= radius_meters {
                    hits.push(Neighbor {
                        id: item.id.clone(),
                        distance_meters: distance,
                    });
                }
            }
        }

        hits.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(hits)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read()?.positions.len())
    }
}
