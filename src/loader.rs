//! Bulk population of the geo index from the spatial store

use crate::error::Result;
use crate::index::{GeoIndex, IndexEntry};
use crate::store::SpatialStore;
use crate::types::EntityKind;
use std::sync::Arc;
use tracing::{debug, info};

/// Default number of rows fetched and upserted per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Outcome of one index load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows read from the store
    pub fetched: usize,
    /// Entries written to the index
    pub indexed: usize,
    /// Rows skipped for missing or invalid coordinates
    pub skipped: usize,
    pub batches: usize,
}

/// Copies entity centroids from the store into the geo index in fixed-size
/// keyset batches.
///
/// Loading is additive: entries already in the index are replaced, never
/// removed. Re-running over unchanged source data yields the same index.
/// Readers may observe a partially loaded index while a load runs.
pub struct BulkIndexLoader {
    store: Arc<dyn SpatialStore>,
    index: Arc<dyn GeoIndex>,
    kind: EntityKind,
    batch_size: usize,
}

impl BulkIndexLoader {
    pub fn new(store: Arc<dyn SpatialStore>, index: Arc<dyn GeoIndex>) -> Self {
        Self {
            store,
            index,
            kind: EntityKind::City,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn load(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let mut after: Option<String> = None;

        loop {
            let rows = self
                .store
                .centroid_batch(self.kind, after.as_deref(), self.batch_size)?;
            let Some(last) = rows.last() else {
                break;
            };
            after = Some(last.id.clone());
            report.fetched += rows.len();

            let mut entries = Vec::with_capacity(rows.len());
            for row in &rows {
                match (row.lon, row.lat) {
                    (Some(lon), Some(lat)) => entries.push(IndexEntry::new(row.id.clone(), lon, lat)),
                    _ => {
                        debug!(id = %row.id, "skipping row without centroid");
                        report.skipped += 1;
                    }
                }
            }

            let outcome = self.index.upsert_batch(&entries)?;
            report.indexed += outcome.applied;
            report.skipped += outcome.skipped;
            report.batches += 1;
            debug!(
                kind = %self.kind,
                batch = report.batches,
                applied = outcome.applied,
                skipped = outcome.skipped,
                "index batch applied"
            );

            if rows.len() < self.batch_size {
                break;
            }
        }

        info!(
            kind = %self.kind,
            fetched = report.fetched,
            indexed = report.indexed,
            skipped = report.skipped,
            batches = report.batches,
            "bulk index load finished"
        );
        Ok(report)
    }
}
