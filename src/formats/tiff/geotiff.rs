//! GeoTIFF georeferencing

use crate::error::Result;
use super::ifd::IFD;
use super::reader::TiffReader;
use super::tags::{self, geo_keys};

/// GeoTIFF information extracted from an IFD
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    /// Model pixel scale (ScaleX, ScaleY, ScaleZ)
    pub pixel_scale: Option<(f64, f64, f64)>,
    /// Model tiepoints (raster -> model coordinate pairs)
    pub tiepoints: Vec<TiePoint>,
    /// ModelTransformation matrix, row major
    pub transform: Option<[f64; 16]>,
    /// GTModelTypeGeoKey
    pub model_type: Option<u16>,
    /// EPSG code from ProjectedCSTypeGeoKey or GeographicTypeGeoKey
    pub epsg_code: Option<u32>,
    /// GeoAsciiParams content
    pub crs_name: Option<String>,
}

/// Represents a GeoTIFF tiepoint
#[derive(Debug, Clone, PartialEq)]
pub struct TiePoint {
    pub pixel_x: f64,
    pub pixel_y: f64,
    pub pixel_z: f64,
    pub geo_x: f64,
    pub geo_y: f64,
    pub geo_z: f64,
}

impl GeoInfo {
    /// Extracts GeoTIFF information from an IFD
    pub fn from_ifd(ifd: &IFD, reader: &TiffReader) -> Result<Option<Self>> {
        if !ifd.is_geotiff() {
            return Ok(None);
        }

        let pixel_scale = reader
            .read_tag_doubles(ifd, tags::MODEL_PIXEL_SCALE)?
            .filter(|values| values.len() >= 3)
            .map(|values| (values[0], values[1], values[2]));

        let tiepoints = reader
            .read_tag_doubles(ifd, tags::MODEL_TIEPOINT)?
            .unwrap_or_default()
            .chunks_exact(6)
            .map(|chunk| TiePoint {
                pixel_x: chunk[0],
                pixel_y: chunk[1],
                pixel_z: chunk[2],
                geo_x: chunk[3],
                geo_y: chunk[4],
                geo_z: chunk[5],
            })
            .collect();

        let transform = reader
            .read_tag_doubles(ifd, tags::MODEL_TRANSFORMATION)?
            .filter(|values| values.len() == 16)
            .map(|values| {
                let mut matrix = [0.0; 16];
                matrix.copy_from_slice(&values);
                matrix
            });

        let mut model_type = None;
        let mut epsg_code = None;
        if let Some(keys) = reader.read_tag_u16s(ifd, tags::GEO_KEY_DIRECTORY)? {
            for (key_id, location, value) in parse_geo_keys(&keys) {
                // Location 0 means the value is stored in the directory itself
                if location != 0 {
                    continue;
                }
                match key_id {
                    geo_keys::GT_MODEL_TYPE => model_type = Some(value),
                    geo_keys::PROJECTED_CS_TYPE => epsg_code = Some(value as u32),
                    geo_keys::GEOGRAPHIC_TYPE if epsg_code.is_none() => {
                        epsg_code = Some(value as u32)
                    }
                    _ => {}
                }
            }
        }
        // 32767 is "user defined", which carries no EPSG code
        let epsg_code = epsg_code.filter(|&code| code != 0 && code != 32767);

        let crs_name = reader
            .read_tag_ascii(ifd, tags::GEO_ASCII_PARAMS)?
            .map(|s| s.trim_end_matches('|').to_string())
            .filter(|s| !s.is_empty());

        Ok(Some(GeoInfo {
            pixel_scale,
            tiepoints,
            transform,
            model_type,
            epsg_code,
            crs_name,
        }))
    }

    /// Computes the affine transform from pixel to geo coordinates
    ///
    /// Returns [a, b, c, d, e, f] where:
    /// geo_x = a + b * pixel_x + c * pixel_y
    /// geo_y = d + e * pixel_x + f * pixel_y
    pub fn affine_transform(&self) -> Option<[f64; 6]> {
        if let Some(m) = &self.transform {
            return Some([m[3], m[0], m[1], m[7], m[4], m[5]]);
        }

        let (scale_x, scale_y, _) = self.pixel_scale?;
        let tp = self.tiepoints.first()?;
        Some([
            tp.geo_x - scale_x * tp.pixel_x,
            scale_x,
            0.0,
            tp.geo_y + scale_y * tp.pixel_y,
            0.0,
            -scale_y,
        ])
    }

    /// Computes the bounding box in geo coordinates
    ///
    /// Returns (min_x, min_y, max_x, max_y)
    pub fn bounding_box(&self, width: u64, height: u64) -> Option<(f64, f64, f64, f64)> {
        let t = self.affine_transform()?;
        let (x0, x1) = (t[0], t[0] + t[1] * width as f64);
        let (y0, y1) = (t[3], t[3] + t[5] * height as f64);
        Some((x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)))
    }

    /// Converts pixel coordinates to geographic coordinates
    pub fn pixel_to_geo(&self, pixel_x: f64, pixel_y: f64) -> Option<(f64, f64)> {
        let t = self.affine_transform()?;
        Some((
            t[0] + t[1] * pixel_x + t[2] * pixel_y,
            t[3] + t[4] * pixel_x + t[5] * pixel_y,
        ))
    }
}

/// Splits a GeoKeyDirectory into (key id, location, value) triples
fn parse_geo_keys(keys: &[u16]) -> Vec<(u16, u16, u16)> {
    if keys.len() < 4 {
        return Vec::new();
    }
    let count = keys[3] as usize;
    keys[4..]
        .chunks_exact(4)
        .take(count)
        .map(|key| (key[0], key[1], key[3]))
        .collect()
}

impl std::fmt::Display for GeoInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nGeoTIFF Information:")?;

        if let Some(epsg) = self.epsg_code {
            writeln!(f, "  EPSG Code: {}", epsg)?;
        }

        if let Some(ref name) = self.crs_name {
            writeln!(f, "  CRS Name: {}", name)?;
        }

        if let Some((sx, sy, _sz)) = self.pixel_scale {
            writeln!(f, "  Pixel Size: {} x {}", sx, sy)?;
        }

        if let Some(t) = self.affine_transform() {
            writeln!(f, "  Origin (geo): ({}, {})", t[0], t[3])?;
        }

        Ok(())
    }
}
