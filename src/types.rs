use crate::error::{GeoQueryError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Kinds of geographic entity held by the spatial store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    City,
    State,
    County,
    ZipArea,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::City => "city",
            EntityKind::State => "state",
            EntityKind::County => "county",
            EntityKind::ZipArea => "zip_area",
        }
    }

    /// Label used when tagging regions in responses.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::City => "City",
            EntityKind::State => "State",
            EntityKind::County => "County",
            EntityKind::ZipArea => "ZipArea",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = GeoQueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "city" => Ok(EntityKind::City),
            "state" => Ok(EntityKind::State),
            "county" => Ok(EntityKind::County),
            "zip_area" | "zip" | "zcta" => Ok(EntityKind::ZipArea),
            other => Err(GeoQueryError::validation(format!(
                "unknown entity kind '{}'",
                other
            ))),
        }
    }
}

/// Candidate generation strategy for polygon searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolygonStrategy {
    /// Exact containment in the spatial store: exact count and ordering
    #[default]
    Exact,
    /// Covering circle plus index radius search: superset, distance ordered
    Accelerated,
}

impl FromStr for PolygonStrategy {
    type Err = GeoQueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(PolygonStrategy::Exact),
            "accelerated" => Ok(PolygonStrategy::Accelerated),
            other => Err(GeoQueryError::validation(format!(
                "unknown polygon strategy '{}'",
                other
            ))),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of entities fetched and upserted per index load batch
    pub index_batch_size: usize,

    /// Expiry for cached free-text search results
    pub search_cache_ttl_secs: u64,

    /// Strategy used by polygon searches unless overridden per call
    pub polygon_strategy: PolygonStrategy,

    /// Version stamp prefixed to every cache key
    pub cache_key_version: u32,

    /// Reject unqualified ids that match more than one entity kind
    pub strict_kind_resolution: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_batch_size: 1000,
            search_cache_ttl_secs: 3600,
            polygon_strategy: PolygonStrategy::default(),
            cache_key_version: 1,
            strict_kind_resolution: false,
        }
    }
}

impl Config {
    pub fn with_index_batch_size(mut self, size: usize) -> Self {
        self.index_batch_size = size.max(1);
        self
    }

    pub fn with_search_cache_ttl(mut self, ttl: Duration) -> Self {
        self.search_cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_polygon_strategy(mut self, strategy: PolygonStrategy) -> Self {
        self.polygon_strategy = strategy;
        self
    }

    pub fn with_cache_key_version(mut self, version: u32) -> Self {
        self.cache_key_version = version;
        self
    }

    pub fn with_strict_kind_resolution(mut self, strict: bool) -> Self {
        self.strict_kind_resolution = strict;
        self
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }

    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GeoQueryError::validation(format!("config: {}", e)))
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GeoQueryError::validation(format!("config {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}

/// Options for cache writes
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live for this entry
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }

    pub fn permanent() -> Self {
        Self { ttl: None }
    }
}

/// A cached payload and its expiry
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub value: Bytes,
    pub expires_at: Option<SystemTime>,
}

impl CacheItem {
    /// A TTL too large to represent as a deadline means the item never expires.
    pub fn new(value: impl Into<Bytes>, opts: &SetOptions) -> Self {
        Self {
            value: value.into(),
            expires_at: opts.ttl.and_then(|ttl| SystemTime::now().checked_add(ttl)),
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => SystemTime::now() > expires_at,
            None => false,
        }
    }
}

/// Validated 1-based pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: i64, limit: i64) -> Result<Self> {
        if page < 1 {
            return Err(GeoQueryError::validation("page must be a positive integer"));
        }
        if limit < 1 {
            return Err(GeoQueryError::validation("limit must be a positive integer"));
        }
        let page = u32::try_from(page)
            .map_err(|_| GeoQueryError::validation("page is out of range"))?;
        let limit = u32::try_from(limit)
            .map_err(|_| GeoQueryError::validation("limit is out of range"))?;
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1).saturating_mul(self.limit as usize)
    }

    /// Index range of this page inside a candidate list of `total` items.
    pub fn window(&self, total: usize) -> Range<usize> {
        let start = self.offset().min(total);
        let end = start.saturating_add(self.limit as usize).min(total);
        start..end
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.window(items.len())]
    }

    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.limit as usize)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = GeoQueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(GeoQueryError::validation(
                "invalid sort_order, must be 'asc' or 'desc'",
            )),
        }
    }
}

/// Entity attribute a within-query can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    Id,
    LandArea,
    WaterArea,
    StateName,
}

impl FromStr for SortField {
    type Err = GeoQueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(SortField::Name),
            "id" | "geoidfq" => Ok(SortField::Id),
            "land_area" | "aland" => Ok(SortField::LandArea),
            "water_area" | "awater" => Ok(SortField::WaterArea),
            "state_name" => Ok(SortField::StateName),
            other => Err(GeoQueryError::validation(format!(
                "cannot sort by '{}'",
                other
            ))),
        }
    }
}

/// Ordering applied to a within-query before pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortField::Id, SortOrder::Asc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_validation() {
        assert!(Page::new(0, 10).is_err());
        assert!(Page::new(1, 0).is_err());
        assert!(Page::new(-3, 10).is_err());
        assert!(Page::new(1, -1).is_err());
        assert!(Page::new(1, 1).is_ok());
    }

    #[test]
    fn test_page_window() {
        let page = Page::new(2, 3).unwrap();
        assert_eq!(page.window(10), 3..6);
        assert_eq!(page.window(4), 3..4);
        assert_eq!(page.window(2), 2..2);
        assert_eq!(page.total_pages(10), 4);
        assert_eq!(page.total_pages(0), 0);
    }

    #[test]
    fn test_pages_cover_list_exactly_once() {
        let items: Vec<u32> = (0..23).collect();
        let limit = 5;
        let pages = items.len().div_ceil(limit);
        let mut seen = Vec::new();
        for p in 1..=pages {
            let page = Page::new(p as i64, limit as i64).unwrap();
            seen.extend_from_slice(page.slice(&items));
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert!("ASCENDING".parse::<SortOrder>().is_err());
        assert_eq!("aland".parse::<SortField>().unwrap(), SortField::LandArea);
        assert!("population".parse::<SortField>().is_err());
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("State".parse::<EntityKind>().unwrap(), EntityKind::State);
        assert_eq!("zcta".parse::<EntityKind>().unwrap(), EntityKind::ZipArea);
        assert!("country".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_cache_item_expiry() {
        let item = CacheItem::new(Bytes::from_static(b"x"), &SetOptions::permanent());
        assert!(!item.is_expired());

        let item = CacheItem::new(
            Bytes::from_static(b"x"),
            &SetOptions::with_ttl(Duration::from_millis(0)),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(item.is_expired());
    }

    #[test]
    fn test_cache_item_unbounded_ttl() {
        let item = CacheItem::new(
            Bytes::from_static(b"x"),
            &SetOptions::with_ttl(Duration::from_secs(u64::MAX)),
        );
        assert!(item.expires_at.is_none());
        assert!(!item.is_expired());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.index_batch_size, 1000);
        assert_eq!(config.search_cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.polygon_strategy, PolygonStrategy::Exact);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            index_batch_size = 250
            polygon_strategy = "accelerated"
            "#,
        )
        .unwrap();
        assert_eq!(config.index_batch_size, 250);
        assert_eq!(config.polygon_strategy, PolygonStrategy::Accelerated);
        assert_eq!(config.cache_key_version, 1);
    }
}
