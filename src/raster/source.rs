//! Memory-mapped GeoTIFF window reader

use std::path::{Path, PathBuf};
use std::sync::Arc;
use rayon::prelude::*;
use tracing::debug;
use crate::cache::{BlockCache, CacheStats, DEFAULT_CACHE_BLOCKS};
use crate::error::{Error, Result};
use crate::formats::tiff::{ImageInfo, TiffReader};
use crate::grid::{Extent, PixelSize};
use crate::types::DataType;
use super::{GeoTransform, Raster};

/// Thread-safe reader of pixel windows from one GeoTIFF
///
/// Decoded blocks are shared between concurrent readers through a
/// lock-free cache, so overlapping tile windows decode each block once.
pub struct RasterSource {
    path: PathBuf,
    reader: TiffReader,
    info: ImageInfo,
    transform: GeoTransform,
    epsg: Option<u32>,
    cache: BlockCache,
}

impl RasterSource {
    /// Opens a GeoTIFF and resolves its first image
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_cache_capacity(path, DEFAULT_CACHE_BLOCKS)
    }

    pub fn with_cache_capacity<P: AsRef<Path>>(path: P, max_blocks: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = TiffReader::open(&path)?;
        let ifd = reader.main_ifd()?;
        let info = reader.image_info(ifd)?;
        let geo = reader.geo_info(ifd)?.ok_or_else(|| {
            Error::InvalidFormat(format!("{} carries no GeoTIFF georeferencing", path.display()))
        })?;
        let transform = GeoTransform::from_geo_info(&geo)?;

        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            bands = info.bands,
            data_type = info.data_type.name(),
            compression = info.compression.name(),
            "opened raster"
        );

        Ok(Self {
            path,
            reader,
            info,
            transform,
            epsg: geo.epsg_code,
            cache: BlockCache::new(max_blocks),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn width(&self) -> u64 {
        self.info.width
    }

    pub fn height(&self) -> u64 {
        self.info.height
    }

    pub fn bands(&self) -> usize {
        self.info.bands
    }

    pub fn data_type(&self) -> DataType {
        self.info.data_type
    }

    /// GDAL_NODATA value of the file
    pub fn nodata(&self) -> Option<f64> {
        self.info.nodata
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn pixel_size(&self) -> PixelSize {
        self.transform.pixel_size
    }

    pub fn extent(&self) -> Result<Extent> {
        self.transform.extent(self.width(), self.height())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn block(&self, index: usize) -> Result<Arc<Vec<u8>>> {
        self.cache
            .get_or_try_insert(index, || self.reader.read_block(&self.info, index))
    }

    /// Reads a `width` x `height` window whose top-left pixel is `(col_off, row_off)`
    ///
    /// The window may reach outside the image; those pixels hold the nodata
    /// value (zero when the file has none).
    pub fn read_window(&self, col_off: i64, row_off: i64, width: u64, height: u64) -> Result<Raster> {
        let mut out = Raster::filled(
            width,
            height,
            self.bands(),
            self.data_type(),
            self.transform.shifted(col_off, row_off),
            self.nodata(),
            self.epsg,
        );

        let c0 = col_off.max(0);
        let r0 = row_off.max(0);
        let c1 = (col_off + width as i64).min(self.width() as i64);
        let r1 = (row_off + height as i64).min(self.height() as i64);
        if c1 <= c0 || r1 <= r0 {
            return Ok(out);
        }

        let bw = self.info.layout.block_width as i64;
        let bh = self.info.layout.block_height as i64;
        let across = self.info.layout.blocks_across(self.width()) as i64;
        let block_cols = (c0 / bw)..=((c1 - 1) / bw);
        let block_rows = (r0 / bh)..=((r1 - 1) / bh);
        let positions: Vec<(i64, i64)> = block_rows
            .flat_map(|by| block_cols.clone().map(move |bx| (bx, by)))
            .collect();

        let blocks: Vec<((i64, i64), Arc<Vec<u8>>)> = positions
            .par_iter()
            .map(|&(bx, by)| Ok(((bx, by), self.block((by * across + bx) as usize)?)))
            .collect::<Result<_>>()?;

        let px = self.info.pixel_size() as i64;
        for ((bx, by), block) in blocks {
            let (bc0, br0) = (bx * bw, by * bh);
            let col_start = bc0.max(c0);
            let col_end = (bc0 + bw).min(c1);
            let len = ((col_end - col_start) * px) as usize;

            for row in br0.max(r0)..(br0 + bh).min(r1) {
                let src = (((row - br0) * bw + (col_start - bc0)) * px) as usize;
                let dst = (((row - row_off) * width as i64 + (col_start - col_off)) * px) as usize;
                out.data[dst..dst + len].copy_from_slice(&block[src..src + len]);
            }
        }

        Ok(out)
    }
}
