//! Coordinate transformation of vector layers
//!
//! Transformation needs PROJ and is only available with the `reproject`
//! feature. Without it, layers in a different CRS than the grid are refused.

use crate::error::{Error, Result};
use super::{FeatureCollection, Geometry, Position};

#[cfg(feature = "reproject")]
mod transformer {
    use proj::Proj;
    use crate::error::{Error, Result};

    /// Transforms coordinates between two EPSG coordinate reference systems
    pub struct Transformer {
        proj: Proj,
        from_epsg: u32,
        to_epsg: u32,
    }

    impl Transformer {
        pub fn new(from_epsg: u32, to_epsg: u32) -> Result<Self> {
            let from = format!("EPSG:{}", from_epsg);
            let to = format!("EPSG:{}", to_epsg);

            let proj = Proj::new_known_crs(&from, &to, None)
                .map_err(|e| Error::Projection(format!("Failed to create projection {} -> {}: {}", from, to, e)))?;

            Ok(Self { proj, from_epsg, to_epsg })
        }

        pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
            self.proj.convert((x, y)).map_err(|e| {
                Error::Projection(format!(
                    "Transformation EPSG:{} -> EPSG:{} failed at ({}, {}): {}",
                    self.from_epsg, self.to_epsg, x, y, e
                ))
            })
        }
    }
}

#[cfg(feature = "reproject")]
pub use transformer::Transformer;

fn map_positions(geometry: &mut Geometry, f: &mut dyn FnMut(&mut Position) -> Result<()>) -> Result<()> {
    match geometry {
        Geometry::Point { coordinates } => f(coordinates),
        Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
            coordinates.iter_mut().try_for_each(|p| f(p))
        }
        Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => coordinates
            .iter_mut()
            .flatten()
            .try_for_each(|p| f(p)),
        Geometry::MultiPolygon { coordinates } => coordinates
            .iter_mut()
            .flatten()
            .flatten()
            .try_for_each(|p| f(p)),
        Geometry::GeometryCollection { geometries } => {
            geometries.iter_mut().try_for_each(|g| map_positions(g, f))
        }
    }
}

/// Brings a collection from `from_epsg` to `to_epsg`
///
/// Identical codes return the collection unchanged. Different codes need the
/// `reproject` feature and fail with a projection error otherwise.
pub fn reproject_collection(collection: FeatureCollection, from_epsg: u32, to_epsg: u32) -> Result<FeatureCollection> {
    if from_epsg == to_epsg {
        return Ok(collection);
    }
    transform_collection(collection, from_epsg, to_epsg)
}

#[cfg(feature = "reproject")]
fn transform_collection(mut collection: FeatureCollection, from_epsg: u32, to_epsg: u32) -> Result<FeatureCollection> {
    let transformer = Transformer::new(from_epsg, to_epsg)?;
    for geometry in collection.features.iter_mut().filter_map(|f| f.geometry.as_mut()) {
        map_positions(geometry, &mut |p| {
            if p.len() < 2 {
                return Err(Error::InvalidFormat("GeoJSON position needs at least two ordinates".to_string()));
            }
            let (x, y) = transformer.transform(p[0], p[1])?;
            p[0] = x;
            p[1] = y;
            Ok(())
        })?;
    }
    collection.set_epsg(to_epsg);
    tracing::debug!(from_epsg, to_epsg, features = collection.len(), "reprojected vector layer");
    Ok(collection)
}

#[cfg(not(feature = "reproject"))]
fn transform_collection(_collection: FeatureCollection, from_epsg: u32, to_epsg: u32) -> Result<FeatureCollection> {
    Err(Error::Projection(format!(
        "Vector layer is in EPSG:{} but the grid is in EPSG:{}; rebuild with the 'reproject' feature to transform it",
        from_epsg, to_epsg
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Feature;

    #[test]
    fn test_same_crs_is_identity() {
        let fc = FeatureCollection::new(vec![Feature::new(Geometry::Point { coordinates: vec![1.0, 2.0] })]);
        let out = reproject_collection(fc.clone(), 2154, 2154).unwrap();
        assert_eq!(out, fc);
    }

    #[cfg(not(feature = "reproject"))]
    #[test]
    fn test_different_crs_without_proj() {
        let fc = FeatureCollection::new(vec![]);
        assert!(matches!(reproject_collection(fc, 4326, 2154), Err(Error::Projection(_))));
    }

    #[cfg(feature = "reproject")]
    #[test]
    fn test_transform_to_web_mercator() {
        let fc = FeatureCollection::new(vec![Feature::new(Geometry::Point { coordinates: vec![0.0, 0.0] })]);
        let out = reproject_collection(fc, 4326, 3857).unwrap();
        assert_eq!(out.epsg(), Some(3857));
        match out.features[0].geometry.as_ref().unwrap() {
            Geometry::Point { coordinates } => {
                assert!(coordinates[0].abs() < 1e-6);
                assert!(coordinates[1].abs() < 1e-6);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }
}
