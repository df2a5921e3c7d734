use thiserror::Error;

/// Errors surfaced by geoquery operations.
///
/// Validation and geometry errors are always raised before any index, cache
/// or store access.
#[derive(Debug, Error)]
pub enum GeoQueryError {
    /// Bad, missing or out-of-range input
    #[error("invalid request: {0}")]
    Validation(String),
    /// Malformed spatial input text
    #[error("invalid geometry: {0}")]
    Geometry(String),
    /// No matching entity or region
    #[error("not found: {0}")]
    NotFound(String),
    /// Index, cache or store could not be reached
    #[error("{backend} unavailable: {reason}")]
    UpstreamUnavailable {
        backend: &'static str,
        reason: String,
    },
    /// Anything unexpected, including incomplete hydration
    #[error("internal error: {0}")]
    Internal(String),
}

impl GeoQueryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GeoQueryError::NotFound(_) => 404,
            GeoQueryError::Validation(_) | GeoQueryError::Geometry(_) => 400,
            GeoQueryError::UpstreamUnavailable { .. } | GeoQueryError::Internal(_) => 500,
        }
    }

    /// Stable label for logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GeoQueryError::Validation(_) => "validation",
            GeoQueryError::Geometry(_) => "geometry",
            GeoQueryError::NotFound(_) => "not_found",
            GeoQueryError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GeoQueryError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for GeoQueryError {
    fn from(err: serde_json::Error) -> Self {
        GeoQueryError::Internal(format!("payload serialization: {}", err))
    }
}

/// Result type alias for geoquery operations
pub type Result<T> = std::result::Result<T, GeoQueryError>;
