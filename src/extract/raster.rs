//! Raster tile extraction: clip and resample to a tile's buffered extent

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::grid::{PixelSize, TileSpec};
use crate::raster::{encode_pixel, is_nodata, GeoTransform, Raster, RasterSource};

/// Sampling of source pixels at target pixel centres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    /// Falls back to nearest when a contributing sample is nodata
    Bilinear,
}

/// Result of extracting one raster tile
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    Raster(Raster),
    /// The tile does not intersect the source
    Empty,
}

/// Source samples around a tile, in source pixel space
struct Neighbourhood<'a> {
    window: &'a Raster,
    col_off: i64,
    row_off: i64,
    width: i64,
    height: i64,
    nodata: Option<f64>,
}

impl Neighbourhood<'_> {
    /// Sample at absolute source pixel `(col, row)`, `None` outside the image or on nodata
    fn sample(&self, col: i64, row: i64, band: usize) -> Option<f64> {
        if col < 0 || row < 0 || col >= self.width || row >= self.height {
            return None;
        }
        let value = self
            .window
            .get((col - self.col_off) as u64, (row - self.row_off) as u64, band);
        (!is_nodata(value, self.nodata)).then_some(value)
    }

    fn nearest(&self, sx: f64, sy: f64, band: usize) -> Option<f64> {
        self.sample(sx.floor() as i64, sy.floor() as i64, band)
    }

    fn bilinear(&self, sx: f64, sy: f64, band: usize) -> Option<f64> {
        let (fx, fy) = (sx - 0.5, sy - 0.5);
        let (c0, r0) = (fx.floor() as i64, fy.floor() as i64);
        let (tx, ty) = (fx - c0 as f64, fy - r0 as f64);

        let corners = (
            self.sample(c0, r0, band),
            self.sample(c0 + 1, r0, band),
            self.sample(c0, r0 + 1, band),
            self.sample(c0 + 1, r0 + 1, band),
        );
        match corners {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let top = a + (b - a) * tx;
                let bottom = c + (d - c) * tx;
                Some(top + (bottom - top) * ty)
            }
            _ => self.nearest(sx, sy, band),
        }
    }
}

/// Clips and resamples a source to a tile's buffered extent
///
/// The output lies on the lattice of `pixel_size` anchored at the buffered
/// extent's top-left corner and keeps the source data type, band count and
/// EPSG code. Pixels outside the source and source nodata become `nodata`.
pub fn extract_raster(
    source: &RasterSource,
    tile: &TileSpec,
    pixel_size: PixelSize,
    nodata: f64,
    resampling: Resampling,
) -> Result<ExtractOutcome> {
    let extent = tile.buffered;
    if !source.extent()?.intersects(&extent) {
        return Ok(ExtractOutcome::Empty);
    }

    let width = (extent.width() / pixel_size.width).round().max(1.0) as u64;
    let height = (extent.height() / pixel_size.height).round().max(1.0) as u64;
    let transform = GeoTransform::new(extent.xmin, extent.ymax, pixel_size);
    let mut out = Raster::filled(
        width,
        height,
        source.bands(),
        source.data_type(),
        transform,
        Some(nodata),
        source.epsg(),
    );

    // Source pixels under the tile, with one pixel of margin for bilinear
    let src = source.transform();
    let (left, top) = src.to_pixel(extent.xmin, extent.ymax);
    let (right, bottom) = src.to_pixel(extent.xmax, extent.ymin);
    let col_off = left.floor() as i64 - 1;
    let row_off = top.floor() as i64 - 1;
    let win_width = (right.ceil() as i64 + 1 - col_off).max(1) as u64;
    let win_height = (bottom.ceil() as i64 + 1 - row_off).max(1) as u64;
    let window = source.read_window(col_off, row_off, win_width, win_height)?;

    let neighbourhood = Neighbourhood {
        window: &window,
        col_off,
        row_off,
        width: source.width() as i64,
        height: source.height() as i64,
        nodata: source.nodata(),
    };

    let data_type = out.data_type;
    let bands = out.bands;
    let size = data_type.size();
    let fill = encode_pixel(data_type, bands, nodata);
    let row_bytes = out.row_bytes();

    out.data
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row, line)| {
            for (col, pixel) in line.chunks_exact_mut(bands * size).enumerate() {
                let (x, y) = transform.pixel_center(col as u64, row as u64);
                let (sx, sy) = src.to_pixel(x, y);
                let samples: Vec<Option<f64>> = (0..bands)
                    .map(|band| match resampling {
                        Resampling::Nearest => neighbourhood.nearest(sx, sy, band),
                        Resampling::Bilinear => neighbourhood.bilinear(sx, sy, band),
                    })
                    .collect();
                if samples.iter().all(Option::is_none) {
                    pixel.copy_from_slice(&fill);
                    continue;
                }
                for (band, sample) in samples.into_iter().enumerate() {
                    data_type.write_le(sample.unwrap_or(nodata), &mut pixel[band * size..]);
                }
            }
        });

    Ok(ExtractOutcome::Raster(out))
}
