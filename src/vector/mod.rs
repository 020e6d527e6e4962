//! GeoJSON vector layers
//!
//! Features are read and written with serde and converted to `geo` types for
//! clipping and footprint tests.

pub mod clip;
pub mod reproject;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use crate::error::{Error, Result};
use crate::grid::Extent;

pub use clip::{clip_to_extent, Footprint};

/// A GeoJSON position: x, y and optional extra ordinates
pub type Position = Vec<f64>;

/// GeoJSON geometry object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// Closed rectangular polygon of an extent
    pub fn from_extent(extent: &Extent) -> Self {
        let ring = vec![
            vec![extent.xmin, extent.ymin],
            vec![extent.xmax, extent.ymin],
            vec![extent.xmax, extent.ymax],
            vec![extent.xmin, extent.ymax],
            vec![extent.xmin, extent.ymin],
        ];
        Geometry::Polygon { coordinates: vec![ring] }
    }

    /// Converts to a `geo` geometry
    pub fn to_geo(&self) -> Result<geo::Geometry<f64>> {
        Ok(match self {
            Geometry::Point { coordinates } => geo::Geometry::Point(geo::Point(coord(coordinates)?)),
            Geometry::MultiPoint { coordinates } => geo::Geometry::MultiPoint(geo::MultiPoint(
                coordinates
                    .iter()
                    .map(|p| coord(p).map(geo::Point))
                    .collect::<Result<_>>()?,
            )),
            Geometry::LineString { coordinates } => geo::Geometry::LineString(line_string(coordinates)?),
            Geometry::MultiLineString { coordinates } => geo::Geometry::MultiLineString(
                geo::MultiLineString(coordinates.iter().map(|l| line_string(l)).collect::<Result<_>>()?),
            ),
            Geometry::Polygon { coordinates } => geo::Geometry::Polygon(polygon(coordinates)?),
            Geometry::MultiPolygon { coordinates } => geo::Geometry::MultiPolygon(geo::MultiPolygon(
                coordinates.iter().map(|p| polygon(p)).collect::<Result<_>>()?,
            )),
            Geometry::GeometryCollection { geometries } => {
                geo::Geometry::GeometryCollection(geo::GeometryCollection(
                    geometries.iter().map(Geometry::to_geo).collect::<Result<_>>()?,
                ))
            }
        })
    }

    /// Converts from a `geo` geometry
    pub fn from_geo(geometry: &geo::Geometry<f64>) -> Self {
        use geo::Geometry as G;
        match geometry {
            G::Point(p) => Geometry::Point { coordinates: position(p.0) },
            G::Line(l) => Geometry::LineString {
                coordinates: vec![position(l.start), position(l.end)],
            },
            G::LineString(ls) => Geometry::LineString { coordinates: positions(ls) },
            G::Polygon(p) => Geometry::Polygon { coordinates: rings(p) },
            G::MultiPoint(mp) => Geometry::MultiPoint {
                coordinates: mp.iter().map(|p| position(p.0)).collect(),
            },
            G::MultiLineString(mls) => Geometry::MultiLineString {
                coordinates: mls.iter().map(positions).collect(),
            },
            G::MultiPolygon(mp) => Geometry::MultiPolygon {
                coordinates: mp.iter().map(rings).collect(),
            },
            G::GeometryCollection(gc) => Geometry::GeometryCollection {
                geometries: gc.iter().map(Geometry::from_geo).collect(),
            },
            G::Rect(r) => Geometry::Polygon { coordinates: rings(&r.to_polygon()) },
            G::Triangle(t) => Geometry::Polygon { coordinates: rings(&t.to_polygon()) },
        }
    }
}

fn coord(p: &Position) -> Result<geo::Coord<f64>> {
    match p.as_slice() {
        [x, y, ..] => Ok(geo::Coord { x: *x, y: *y }),
        _ => Err(Error::InvalidFormat(format!(
            "GeoJSON position needs at least two ordinates, got {}",
            p.len()
        ))),
    }
}

fn line_string(points: &[Position]) -> Result<geo::LineString<f64>> {
    Ok(geo::LineString(points.iter().map(coord).collect::<Result<_>>()?))
}

fn polygon(rings: &[Vec<Position>]) -> Result<geo::Polygon<f64>> {
    let mut rings = rings.iter().map(|r| line_string(r));
    let exterior = rings
        .next()
        .transpose()?
        .ok_or_else(|| Error::InvalidFormat("Polygon without exterior ring".to_string()))?;
    Ok(geo::Polygon::new(exterior, rings.collect::<Result<_>>()?))
}

fn position(c: geo::Coord<f64>) -> Position {
    vec![c.x, c.y]
}

fn positions(ls: &geo::LineString<f64>) -> Vec<Position> {
    ls.coords().map(|c| position(*c)).collect()
}

fn rings(p: &geo::Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(p.exterior())
        .chain(p.interiors())
        .map(positions)
        .collect()
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// GeoJSON feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties: Map::new(),
        }
    }

    pub fn set_property(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// GeoJSON feature collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    /// Legacy named CRS member, kept so EPSG codes survive a round trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Value>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { crs: None, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Reads a GeoJSON FeatureCollection file
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Writes this collection as GeoJSON
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// EPSG code of a named CRS such as `urn:ogc:def:crs:EPSG::2154`
    pub fn epsg(&self) -> Option<u32> {
        let name = self.crs.as_ref()?.get("properties")?.get("name")?.as_str()?;
        let upper = name.to_ascii_uppercase();
        let code = upper.rsplit(|c| c == ':').next()?;
        if upper.contains("EPSG") {
            code.parse().ok()
        } else if upper.ends_with("CRS84") {
            Some(4326)
        } else {
            None
        }
    }

    /// Sets a named CRS member for an EPSG code
    pub fn set_epsg(&mut self, code: u32) {
        self.crs = Some(serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", code) }
        }));
    }

    /// Bounding extent of all geometries, `None` when there is no area
    pub fn extent(&self) -> Result<Option<Extent>> {
        use geo::BoundingRect;
        let mut bounds: Option<geo::Rect<f64>> = None;
        for geometry in self.features.iter().filter_map(|f| f.geometry.as_ref()) {
            if let Some(rect) = geometry.to_geo()?.bounding_rect() {
                bounds = Some(match bounds {
                    None => rect,
                    Some(b) => geo::Rect::new(
                        geo::Coord { x: b.min().x.min(rect.min().x), y: b.min().y.min(rect.min().y) },
                        geo::Coord { x: b.max().x.max(rect.max().x), y: b.max().y.max(rect.max().y) },
                    ),
                });
            }
        }
        Ok(bounds.and_then(|b| Extent::new(b.min().x, b.max().x, b.min().y, b.max().y).ok()))
    }
}
