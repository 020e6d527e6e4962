//! Rectangle clipping and footprint tests

use std::path::Path;
use geo::{BooleanOps, BoundingRect, Intersects};
use crate::error::{Error, Result};
use crate::grid::Extent;
use super::{Feature, FeatureCollection, Geometry};

fn window_polygon(extent: &Extent) -> geo::Polygon<f64> {
    geo::Rect::new(
        geo::Coord { x: extent.xmin, y: extent.ymin },
        geo::Coord { x: extent.xmax, y: extent.ymax },
    )
    .to_polygon()
}

fn rect_inside(rect: &geo::Rect<f64>, extent: &Extent) -> bool {
    rect.min().x >= extent.xmin
        && rect.max().x <= extent.xmax
        && rect.min().y >= extent.ymin
        && rect.max().y <= extent.ymax
}

fn rect_disjoint(rect: &geo::Rect<f64>, extent: &Extent) -> bool {
    rect.max().x < extent.xmin
        || rect.min().x > extent.xmax
        || rect.max().y < extent.ymin
        || rect.min().y > extent.ymax
}

/// Clips one geometry to the window; `None` when nothing remains
fn clip_geometry(geometry: geo::Geometry<f64>, extent: &Extent, window: &geo::Polygon<f64>) -> Option<geo::Geometry<f64>> {
    use geo::Geometry as G;

    match geometry.bounding_rect() {
        None => return None,
        Some(rect) if rect_disjoint(&rect, extent) => return None,
        Some(rect) if rect_inside(&rect, extent) => return Some(geometry),
        Some(_) => {}
    }

    match geometry {
        G::Point(p) => extent.contains_point(p.x(), p.y()).then_some(G::Point(p)),
        G::MultiPoint(mp) => {
            let kept: Vec<_> = mp
                .into_iter()
                .filter(|p| extent.contains_point(p.x(), p.y()))
                .collect();
            (!kept.is_empty()).then(|| G::MultiPoint(geo::MultiPoint(kept)))
        }
        G::Line(l) => clip_lines(geo::MultiLineString(vec![l.into()]), window),
        G::LineString(ls) => clip_lines(geo::MultiLineString(vec![ls]), window),
        G::MultiLineString(mls) => clip_lines(mls, window),
        G::Polygon(p) => clip_polygons(geo::MultiPolygon(vec![p]), window),
        G::MultiPolygon(mp) => clip_polygons(mp, window),
        G::Rect(r) => clip_polygons(geo::MultiPolygon(vec![r.to_polygon()]), window),
        G::Triangle(t) => clip_polygons(geo::MultiPolygon(vec![t.to_polygon()]), window),
        G::GeometryCollection(gc) => {
            let kept: Vec<_> = gc
                .into_iter()
                .filter_map(|g| clip_geometry(g, extent, window))
                .collect();
            (!kept.is_empty()).then(|| G::GeometryCollection(geo::GeometryCollection(kept)))
        }
    }
}

fn clip_lines(lines: geo::MultiLineString<f64>, window: &geo::Polygon<f64>) -> Option<geo::Geometry<f64>> {
    let mut clipped: Vec<_> = window
        .clip(&lines, false)
        .into_iter()
        .filter(|ls| ls.0.len() >= 2)
        .collect();
    match clipped.len() {
        0 => None,
        1 => clipped.pop().map(geo::Geometry::LineString),
        _ => Some(geo::Geometry::MultiLineString(geo::MultiLineString(clipped))),
    }
}

fn clip_polygons(polygons: geo::MultiPolygon<f64>, window: &geo::Polygon<f64>) -> Option<geo::Geometry<f64>> {
    let mut clipped = polygons.intersection(window);
    match clipped.0.len() {
        0 => None,
        1 => clipped.0.pop().map(geo::Geometry::Polygon),
        _ => Some(geo::Geometry::MultiPolygon(clipped)),
    }
}

/// Clips every feature of a collection to a rectangle
///
/// Polygons are intersected with the rectangle, lines are cut at its
/// boundary and points are kept when they fall inside it (boundary
/// included). Features left without geometry are dropped; properties and
/// ids are carried over.
pub fn clip_to_extent(collection: &FeatureCollection, extent: &Extent) -> Result<FeatureCollection> {
    let window = window_polygon(extent);
    let mut features = Vec::new();

    for feature in &collection.features {
        let Some(geometry) = &feature.geometry else { continue };
        if let Some(clipped) = clip_geometry(geometry.to_geo()?, extent, &window) {
            features.push(Feature {
                id: feature.id.clone(),
                geometry: Some(Geometry::from_geo(&clipped)),
                properties: feature.properties.clone(),
            });
        }
    }

    Ok(FeatureCollection {
        crs: collection.crs.clone(),
        features,
    })
}

/// Irregular area of interest made of one or more polygons
#[derive(Debug, Clone)]
pub struct Footprint {
    polygons: geo::MultiPolygon<f64>,
    bounds: geo::Rect<f64>,
}

impl Footprint {
    /// Collects the polygonal geometries of a feature collection
    pub fn from_collection(collection: &FeatureCollection) -> Result<Self> {
        let mut polygons = Vec::new();
        for geometry in collection.features.iter().filter_map(|f| f.geometry.as_ref()) {
            collect_polygons(geometry.to_geo()?, &mut polygons);
        }
        let polygons = geo::MultiPolygon(polygons);
        let bounds = polygons
            .bounding_rect()
            .ok_or_else(|| Error::InvalidFormat("Footprint contains no polygon".to_string()))?;
        Ok(Self { polygons, bounds })
    }

    /// Reads a footprint from a GeoJSON file
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_collection(&FeatureCollection::read(path)?)
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.0.len()
    }

    /// Bounding extent of the footprint
    pub fn extent(&self) -> Result<Extent> {
        Extent::new(self.bounds.min().x, self.bounds.max().x, self.bounds.min().y, self.bounds.max().y)
    }

    /// Whether a point lies inside or on the boundary of any polygon
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if x < self.bounds.min().x || x > self.bounds.max().x || y < self.bounds.min().y || y > self.bounds.max().y {
            return false;
        }
        let point = geo::Coord { x, y };
        self.polygons.0.iter().any(|p| p.intersects(&point))
    }
}

fn collect_polygons(geometry: geo::Geometry<f64>, out: &mut Vec<geo::Polygon<f64>>) {
    use geo::Geometry as G;
    match geometry {
        G::Polygon(p) => out.push(p),
        G::MultiPolygon(mp) => out.extend(mp),
        G::Rect(r) => out.push(r.to_polygon()),
        G::Triangle(t) => out.push(t.to_polygon()),
        G::GeometryCollection(gc) => gc.into_iter().for_each(|g| collect_polygons(g, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use serde_json::json;

    fn feature(geometry: Geometry) -> Feature {
        let mut f = Feature::new(geometry);
        f.set_property("name", json!("f"));
        f
    }

    fn square(x0: f64, y0: f64, size: f64) -> Geometry {
        Geometry::from_extent(&Extent::new(x0, x0 + size, y0, y0 + size).unwrap())
    }

    #[test]
    fn test_clip_polygon() {
        let fc = FeatureCollection::new(vec![feature(square(5.0, 5.0, 10.0))]);
        let window = Extent::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let clipped = clip_to_extent(&fc, &window).unwrap();

        assert_eq!(clipped.len(), 1);
        let geometry = clipped.features[0].geometry.as_ref().unwrap().to_geo().unwrap();
        match geometry {
            geo::Geometry::Polygon(p) => assert!((p.unsigned_area() - 25.0).abs() < 1e-9),
            other => panic!("unexpected geometry {:?}", other),
        }
        assert_eq!(clipped.features[0].property("name"), Some(&json!("f")));
    }

    #[test]
    fn test_clip_keeps_inside_drops_outside() {
        let inside = square(1.0, 1.0, 2.0);
        let fc = FeatureCollection::new(vec![
            feature(inside.clone()),
            feature(square(20.0, 20.0, 2.0)),
            feature(Geometry::Point { coordinates: vec![10.0, 3.0] }),
            feature(Geometry::Point { coordinates: vec![10.5, 3.0] }),
        ]);
        let window = Extent::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let clipped = clip_to_extent(&fc, &window).unwrap();

        assert_eq!(clipped.len(), 2);
        assert_eq!(clipped.features[0].geometry.as_ref(), Some(&inside));
        assert_eq!(
            clipped.features[1].geometry.as_ref(),
            Some(&Geometry::Point { coordinates: vec![10.0, 3.0] })
        );
    }

    #[test]
    fn test_clip_line() {
        let line = Geometry::LineString {
            coordinates: vec![vec![-5.0, 5.0], vec![15.0, 5.0]],
        };
        let fc = FeatureCollection::new(vec![feature(line)]);
        let window = Extent::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let clipped = clip_to_extent(&fc, &window).unwrap();

        assert_eq!(clipped.len(), 1);
        match clipped.features[0].geometry.as_ref().unwrap() {
            Geometry::LineString { coordinates } => {
                let xs: Vec<f64> = coordinates.iter().map(|p| p[0]).collect();
                let min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                assert!((min - 0.0).abs() < 1e-9);
                assert!((max - 10.0).abs() < 1e-9);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_footprint() {
        let triangle = Geometry::Polygon {
            coordinates: vec![vec![
                vec![0.0, 0.0],
                vec![10.0, 0.0],
                vec![0.0, 10.0],
                vec![0.0, 0.0],
            ]],
        };
        let footprint = Footprint::from_collection(&FeatureCollection::new(vec![feature(triangle)])).unwrap();
        assert_eq!(footprint.polygon_count(), 1);
        assert!(footprint.contains_point(1.0, 1.0));
        assert!(!footprint.contains_point(8.0, 8.0));
        assert!(!footprint.contains_point(-1.0, 1.0));
        assert_eq!(footprint.extent().unwrap(), Extent::new(0.0, 10.0, 0.0, 10.0).unwrap());
    }

    #[test]
    fn test_footprint_without_polygons() {
        let fc = FeatureCollection::new(vec![feature(Geometry::Point { coordinates: vec![0.0, 0.0] })]);
        assert!(Footprint::from_collection(&fc).is_err());
    }
}
