//! In-memory rasters and their north-up georeferencing

pub mod source;

use std::path::Path;
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::formats::tiff::{GeoInfo, GeoTiffWriter, Georeference, ImageData};
use crate::grid::{Extent, PixelSize, PixelWindow};
use crate::types::DataType;

pub use source::RasterSource;

/// Tolerance, in pixels, when matching coordinates to a pixel lattice
pub const ALIGN_TOLERANCE: f64 = 1e-6;

/// Whether a sample equals the nodata value; a NaN nodata matches any NaN
pub fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    match nodata {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}

/// North-up affine transform: top-left corner and pixel size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: PixelSize,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_size: PixelSize) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_size,
        }
    }

    /// Builds a transform from `[a, b, c, d, e, f]` affine coefficients
    ///
    /// Only north-up transforms (no rotation, negative row step) are accepted.
    pub fn from_affine(t: [f64; 6]) -> Result<Self> {
        if t[2] != 0.0 || t[4] != 0.0 {
            return Err(Error::Unsupported("Rotated geotransform".to_string()));
        }
        if t[1] <= 0.0 || t[5] >= 0.0 {
            return Err(Error::Unsupported(format!(
                "Geotransform is not north-up (pixel steps {}, {})",
                t[1], t[5]
            )));
        }
        Ok(Self::new(t[0], t[3], PixelSize::new(t[1], -t[5])?))
    }

    /// Reads the transform of a GeoTIFF
    pub fn from_geo_info(geo: &GeoInfo) -> Result<Self> {
        let affine = geo
            .affine_transform()
            .ok_or_else(|| Error::InvalidFormat("GeoTIFF has no pixel scale and tiepoint".to_string()))?;
        Self::from_affine(affine)
    }

    /// Extent covered by `width` x `height` pixels
    pub fn extent(&self, width: u64, height: u64) -> Result<Extent> {
        Extent::new(
            self.origin_x,
            self.origin_x + width as f64 * self.pixel_size.width,
            self.origin_y - height as f64 * self.pixel_size.height,
            self.origin_y,
        )
    }

    /// Fractional column and row of a map coordinate
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_size.width,
            (self.origin_y - y) / self.pixel_size.height,
        )
    }

    /// Map coordinate of the centre of a pixel
    pub fn pixel_center(&self, col: u64, row: u64) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_size.width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_size.height,
        )
    }

    /// Transform of a sub-window starting at `(col, row)`, which may be negative
    pub fn shifted(&self, col: i64, row: i64) -> GeoTransform {
        GeoTransform::new(
            self.origin_x + col as f64 * self.pixel_size.width,
            self.origin_y - row as f64 * self.pixel_size.height,
            self.pixel_size,
        )
    }

    /// Pixel window of an extent that lies on this transform's lattice
    ///
    /// Fails when an edge is off the lattice or the extent reaches outside
    /// the `width` x `height` raster.
    pub fn aligned_window(&self, extent: &Extent, width: u64, height: u64) -> Option<PixelWindow> {
        let (c0, r0) = self.to_pixel(extent.xmin, extent.ymax);
        let (c1, r1) = self.to_pixel(extent.xmax, extent.ymin);
        let snapped: Vec<f64> = [c0, r0, c1, r1].iter().map(|v| v.round()).collect();
        let aligned = [c0, r0, c1, r1]
            .iter()
            .zip(&snapped)
            .all(|(v, s)| (v - s).abs() <= ALIGN_TOLERANCE);
        if !aligned || snapped[0] < 0.0 || snapped[1] < 0.0 {
            return None;
        }
        let (c0, r0, c1, r1) = (snapped[0] as u64, snapped[1] as u64, snapped[2] as u64, snapped[3] as u64);
        if c1 <= c0 || r1 <= r0 || c1 > width || r1 > height {
            return None;
        }
        Some(PixelWindow::new(c0, r0, c1 - c0, r1 - r0))
    }

    pub fn to_georeference(&self, epsg: Option<u32>) -> Georeference {
        Georeference {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            pixel_width: self.pixel_size.width,
            pixel_height: self.pixel_size.height,
            epsg,
        }
    }
}

/// Pixel-interleaved raster with little-endian samples of native width
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u64,
    pub height: u64,
    pub bands: usize,
    pub data_type: DataType,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub epsg: Option<u32>,
    pub data: Vec<u8>,
}

impl Raster {
    /// Creates a raster with every sample set to the nodata value (or zero)
    pub fn filled(
        width: u64,
        height: u64,
        bands: usize,
        data_type: DataType,
        transform: GeoTransform,
        nodata: Option<f64>,
        epsg: Option<u32>,
    ) -> Self {
        let pixel = encode_pixel(data_type, bands, nodata.unwrap_or(0.0));
        let data = pixel.repeat((width * height) as usize);
        Self {
            width,
            height,
            bands,
            data_type,
            transform,
            nodata,
            epsg,
            data,
        }
    }

    /// Reads a whole GeoTIFF into memory
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = RasterSource::open(path)?;
        source.read_window(0, 0, source.width(), source.height())
    }

    /// Bytes of one pixel across all bands
    pub fn pixel_bytes(&self) -> usize {
        self.bands * self.data_type.size()
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.pixel_bytes()
    }

    pub fn extent(&self) -> Result<Extent> {
        self.transform.extent(self.width, self.height)
    }

    fn offset(&self, col: u64, row: u64) -> usize {
        (row as usize * self.width as usize + col as usize) * self.pixel_bytes()
    }

    /// Raw bytes of one pixel
    pub fn pixel(&self, col: u64, row: u64) -> &[u8] {
        let start = self.offset(col, row);
        &self.data[start..start + self.pixel_bytes()]
    }

    pub fn pixel_mut(&mut self, col: u64, row: u64) -> &mut [u8] {
        let start = self.offset(col, row);
        let len = self.pixel_bytes();
        &mut self.data[start..start + len]
    }

    /// Sample of one band as f64
    pub fn get(&self, col: u64, row: u64, band: usize) -> f64 {
        let size = self.data_type.size();
        self.data_type.read_le(&self.pixel(col, row)[band * size..])
    }

    pub fn set(&mut self, col: u64, row: u64, band: usize, value: f64) {
        let size = self.data_type.size();
        let data_type = self.data_type;
        data_type.write_le(value, &mut self.pixel_mut(col, row)[band * size..]);
    }

    /// Whether every band of a pixel holds the nodata value
    pub fn is_nodata_pixel(&self, col: u64, row: u64) -> bool {
        self.nodata.is_some() && (0..self.bands).all(|b| is_nodata(self.get(col, row, b), self.nodata))
    }

    /// Sets every band of a pixel to the nodata value (or zero)
    pub fn clear_pixel(&mut self, col: u64, row: u64) {
        let fill = encode_pixel(self.data_type, self.bands, self.nodata.unwrap_or(0.0));
        self.pixel_mut(col, row).copy_from_slice(&fill);
    }

    /// Copies a window of this raster into a new raster
    pub fn crop(&self, window: &PixelWindow) -> Result<Raster> {
        if window.width == 0 || window.height == 0 || window.col_end() > self.width || window.row_end() > self.height {
            return Err(Error::OutOfBounds(format!(
                "Window {:?} outside {} x {} raster",
                window, self.width, self.height
            )));
        }
        let row_len = window.width as usize * self.pixel_bytes();
        let mut data = Vec::with_capacity(row_len * window.height as usize);
        for row in window.row_off..window.row_end() {
            let start = self.offset(window.col_off, row);
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Ok(Raster {
            width: window.width,
            height: window.height,
            bands: self.bands,
            data_type: self.data_type,
            transform: self.transform.shifted(window.col_off as i64, window.row_off as i64),
            nodata: self.nodata,
            epsg: self.epsg,
            data,
        })
    }

    /// Writes this raster as a tiled GeoTIFF
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P, compression: Compression) -> Result<()> {
        let width = u32::try_from(self.width)
            .map_err(|_| Error::Unsupported(format!("Raster width {} exceeds TIFF limits", self.width)))?;
        let height = u32::try_from(self.height)
            .map_err(|_| Error::Unsupported(format!("Raster height {} exceeds TIFF limits", self.height)))?;
        let bands = u16::try_from(self.bands)
            .map_err(|_| Error::Unsupported(format!("{} bands", self.bands)))?;

        let image = ImageData {
            width,
            height,
            bands,
            data_type: self.data_type,
            samples: &self.data,
        };
        GeoTiffWriter::new(compression).write(
            path,
            &image,
            &self.transform.to_georeference(self.epsg),
            self.nodata,
        )
    }
}

/// One pixel with every band set to `value`
pub(crate) fn encode_pixel(data_type: DataType, bands: usize, value: f64) -> Vec<u8> {
    let size = data_type.size();
    let mut pixel = vec![0u8; bands * size];
    for band in 0..bands {
        data_type.write_le(value, &mut pixel[band * size..]);
    }
    pixel
}
