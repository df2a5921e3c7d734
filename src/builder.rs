//! Service builder
//!
//! Wires the geo index, entity cache and spatial store into a
//! [`GeoQueryService`]. The three handles are constructed once at process
//! start and shared by every request.

use crate::cache::{EntityCache, MemoryCache};
use crate::error::{GeoQueryError, Result};
use crate::index::{GeoIndex, MemoryGeoIndex};
use crate::service::GeoQueryService;
use crate::store::SpatialStore;
use crate::types::Config;
use std::sync::Arc;
use tracing::info;

/// Builder for [`GeoQueryService`] instances.
///
/// A spatial store is required. The index and cache default to the
/// in-process [`MemoryGeoIndex`] and [`MemoryCache`].
///
/// # Examples
///
/// ## Basic usage
/// ```rust
/// use geoquery::{MemorySpatialStore, ServiceBuilder};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = ServiceBuilder::new()
///     .store(Arc::new(MemorySpatialStore::new()))
///     .build()?;
///
/// let nearby = service.nearby_search(40.7128, -74.0060, 5000.0, 1, 10)?;
/// assert_eq!(nearby.total_count, 0);
/// # Ok(())
/// # }
/// ```
///
/// ## Custom configuration and startup index load
/// ```rust
/// use geoquery::{Config, MemorySpatialStore, PolygonStrategy, ServiceBuilder};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default()
///     .with_index_batch_size(500)
///     .with_polygon_strategy(PolygonStrategy::Accelerated);
///
/// let service = ServiceBuilder::new()
///     .store(Arc::new(MemorySpatialStore::new()))
///     .config(config)
///     .load_index_on_build(true)
///     .build()?;
/// assert_eq!(service.config().index_batch_size, 500);
/// # Ok(())
/// # }
/// ```
pub struct ServiceBuilder {
    index: Option<Arc<dyn GeoIndex>>,
    cache: Option<Arc<dyn EntityCache>>,
    store: Option<Arc<dyn SpatialStore>>,
    config: Config,
    load_index: bool,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            index: None,
            cache: None,
            store: None,
            config: Config::default(),
            load_index: false,
        }
    }

    /// Set the geo index used for radius searches.
    pub fn index(mut self, index: Arc<dyn GeoIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the cache holding materialized views.
    pub fn cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the durable spatial store. Required.
    pub fn store(mut self, store: Arc<dyn SpatialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Run a bulk index load before returning the service.
    pub fn load_index_on_build(mut self, load: bool) -> Self {
        self.load_index = load;
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns a validation error when no store was set, and any error of
    /// the startup index load when it is enabled.
    pub fn build(self) -> Result<GeoQueryService> {
        let store = self
            .store
            .ok_or_else(|| GeoQueryError::validation("a spatial store is required"))?;
        let index = self
            .index
            .unwrap_or_else(|| Arc::new(MemoryGeoIndex::new()));
        let cache = self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));

        let service = GeoQueryService::new(index, cache, store, self.config);

        if self.load_index {
            let report = service.reload_index()?;
            info!(indexed = report.indexed, "startup index load complete");
        }

        Ok(service)
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
