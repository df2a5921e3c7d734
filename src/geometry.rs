//! Geometry parsing and serialization
//!
//! Exact geometries are held as `geo` types. They cross the crate boundary in
//! two text forms: WKT for query input and a GeoJSON-compatible
//! [`PortableGeometry`] for cached views and responses.

use crate::error::{GeoQueryError, Result};
use crate::spatial::{BoundingBox, Point};
use geo::{
    BoundingRect, Centroid, Contains, Coord, CoordsIter, Geometry, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Polygon, Relate,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

type Position = [f64; 2];

/// GeoJSON geometry object (`{"type": ..., "coordinates": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum PortableGeometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

fn position(coord: &Coord<f64>) -> Position {
    [coord.x, coord.y]
}

fn line_positions(line: &LineString<f64>) -> Vec<Position> {
    line.0.iter().map(position).collect()
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(line_positions)
        .collect()
}

fn to_line(positions: &[Position]) -> LineString<f64> {
    LineString::from(
        positions
            .iter()
            .map(|p| Coord { x: p[0], y: p[1] })
            .collect::<Vec<_>>(),
    )
}

fn to_polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| GeoQueryError::geometry("polygon has no rings"))?;
    Ok(Polygon::new(
        to_line(exterior),
        interiors.iter().map(|r| to_line(r)).collect(),
    ))
}

impl PortableGeometry {
    pub fn from_geo(geometry: &Geometry<f64>) -> Result<Self> {
        Ok(match geometry {
            Geometry::Point(p) => PortableGeometry::Point([p.x(), p.y()]),
            Geometry::MultiPoint(mp) => {
                PortableGeometry::MultiPoint(mp.iter().map(|p| [p.x(), p.y()]).collect())
            }
            Geometry::Line(line) => {
                PortableGeometry::LineString(vec![position(&line.start), position(&line.end)])
            }
            Geometry::LineString(line) => PortableGeometry::LineString(line_positions(line)),
            Geometry::MultiLineString(mls) => {
                PortableGeometry::MultiLineString(mls.iter().map(line_positions).collect())
            }
            Geometry::Polygon(polygon) => PortableGeometry::Polygon(polygon_rings(polygon)),
            Geometry::MultiPolygon(mp) => {
                PortableGeometry::MultiPolygon(mp.iter().map(polygon_rings).collect())
            }
            Geometry::Rect(rect) => PortableGeometry::Polygon(polygon_rings(&rect.to_polygon())),
            Geometry::Triangle(tri) => {
                PortableGeometry::Polygon(polygon_rings(&tri.to_polygon()))
            }
            Geometry::GeometryCollection(_) => {
                return Err(GeoQueryError::geometry(
                    "geometry collections have no portable form",
                ));
            }
        })
    }

    pub fn to_geo(&self) -> Result<Geometry<f64>> {
        Ok(match self {
            PortableGeometry::Point(p) => Geometry::Point(geo::Point::new(p[0], p[1])),
            PortableGeometry::MultiPoint(points) => Geometry::MultiPoint(MultiPoint::new(
                points.iter().map(|p| geo::Point::new(p[0], p[1])).collect(),
            )),
            PortableGeometry::LineString(line) => Geometry::LineString(to_line(line)),
            PortableGeometry::MultiLineString(lines) => Geometry::MultiLineString(
                MultiLineString::new(lines.iter().map(|l| to_line(l)).collect()),
            ),
            PortableGeometry::Polygon(rings) => Geometry::Polygon(to_polygon(rings)?),
            PortableGeometry::MultiPolygon(polygons) => Geometry::MultiPolygon(MultiPolygon::new(
                polygons
                    .iter()
                    .map(|rings| to_polygon(rings))
                    .collect::<Result<Vec<_>>>()?,
            )),
        })
    }
}

/// A circle guaranteed to cover a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingCircle {
    pub center: Point,
    pub radius_meters: f64,
}

impl BoundingCircle {
    /// Circle centered on the geometry's centroid whose radius reaches the
    /// farthest vertex.
    pub fn covering(geometry: &Geometry<f64>) -> Result<Self> {
        let center = centroid(geometry)
            .ok_or_else(|| GeoQueryError::geometry("geometry has no centroid"))?;
        let radius_meters = geometry
            .coords_iter()
            .map(|c| center.distance_to(&Point::new(c.y, c.x)))
            .fold(0.0_f64, f64::max);
        Ok(Self {
            center,
            radius_meters,
        })
    }
}

pub fn centroid(geometry: &Geometry<f64>) -> Option<Point> {
    geometry.centroid().map(Point::from_geo)
}

pub fn bounding_box(geometry: &Geometry<f64>) -> Option<BoundingBox> {
    geometry
        .bounding_rect()
        .map(|r| BoundingBox::new(r.min().y, r.min().x, r.max().y, r.max().x))
}

/// Point-in-geometry test. Points on the boundary are not contained.
pub fn contains_point(geometry: &Geometry<f64>, point: &Point) -> bool {
    geometry.contains(&point.to_geo())
}

/// `inner` lies within `outer` (DE-9IM within).
pub fn is_within(inner: &Geometry<f64>, outer: &Geometry<f64>) -> bool {
    inner.relate(outer).is_within()
}

/// Parse a polygonal WKT string (`POLYGON` or `MULTIPOLYGON`).
pub fn parse_polygon_wkt(text: &str) -> Result<Geometry<f64>> {
    match parse_wkt(text)? {
        g @ (Geometry::Polygon(_) | Geometry::MultiPolygon(_)) => Ok(g),
        other => Err(GeoQueryError::geometry(format!(
            "expected POLYGON or MULTIPOLYGON, got {}",
            geometry_type(&other)
        ))),
    }
}

/// Parse WKT (optionally EWKT-prefixed with `SRID=n;`). Z and M ordinates
/// are dropped; polygon rings are closed and must span at least three vertices.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    let mut body = text.trim();
    if body
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("SRID="))
    {
        body = body
            .split_once(';')
            .map(|(_, rest)| rest)
            .ok_or_else(|| GeoQueryError::geometry("SRID prefix without ';'"))?;
    }

    let geometry: Geometry<f64> = wkt::Wkt::<f64>::from_str(body)
        .map_err(|e| GeoQueryError::geometry(format!("invalid WKT: {}", e)))
        .and_then(|w| {
            w.try_into().map_err(|e: wkt::conversion::Error| {
                GeoQueryError::geometry(format!("unsupported WKT: {}", e))
            })
        })?;

    let has_bad_coord = geometry
        .coords_iter()
        .any(|c| !c.x.is_finite() || !c.y.is_finite());
    if has_bad_coord {
        return Err(GeoQueryError::geometry("non-finite coordinate"));
    }
    match &geometry {
        Geometry::Polygon(polygon) => check_rings(polygon)?,
        Geometry::MultiPolygon(mp) => mp.iter().try_for_each(check_rings)?,
        _ => {}
    }
    Ok(geometry)
}

fn check_rings(polygon: &Polygon<f64>) -> Result<()> {
    let degenerate = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .any(|ring| !ring.0.is_empty() && ring.0.len() < 4);
    if degenerate {
        return Err(GeoQueryError::geometry(
            "polygon ring needs at least three distinct vertices",
        ));
    }
    Ok(())
}

pub fn geometry_type(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Serde adapter storing a `geo::Geometry` as a [`PortableGeometry`].
pub mod portable_serde {
    use super::PortableGeometry;
    use geo::Geometry;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        geometry: &Geometry<f64>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        PortableGeometry::from_geo(geometry)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Geometry<f64>, D::Error> {
        PortableGeometry::deserialize(deserializer)?
            .to_geo()
            .map_err(serde::de::Error::custom)
    }
}
