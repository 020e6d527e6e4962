//! Reassembly of tile outputs into one raster
//!
//! The mosaic is produced one band of rows at a time. Tile outputs are opened
//! memory-mapped when the band reaches their core and released once it has
//! passed; only the core window of each tile is read. Each band is pasted,
//! optionally clipped to a footprint and handed to a sink: an in-memory
//! raster or a GeoTIFF streamed block row by block row.

use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::executor::ProcessingResult;
use crate::formats::tiff::{BigTiff, BlockWriter, GeoTiffWriter, ImageShape};
use crate::grid::{Extent, Grid, PixelWindow, TileSpec};
use crate::raster::{encode_pixel, is_nodata, GeoTransform, Raster, RasterSource, ALIGN_TOLERANCE};
use crate::types::DataType;
use crate::vector::Footprint;

/// Decoded blocks cached per open tile output
const TILE_CACHE_BLOCKS: usize = 64;

/// Rows per band when merging into memory
const MEMORY_BAND_ROWS: u64 = 256;

/// Settings of a merge
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Extent of the mosaic; the grid's data extent when unset
    pub output_extent: Option<Extent>,
    pub nodata: f64,
    /// Pixels whose centre falls outside these polygons become nodata
    pub final_clip: Option<Footprint>,
    /// CRS the mosaic must carry
    pub target_epsg: Option<u32>,
    pub compression: Compression,
    pub big_tiff: BigTiff,
}

/// Layout of a written mosaic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicInfo {
    pub width: u64,
    pub height: u64,
    pub bands: usize,
    pub data_type: DataType,
    pub epsg: Option<u32>,
    pub tiles: usize,
}

fn open_output(result: &ProcessingResult) -> Result<RasterSource> {
    RasterSource::with_cache_capacity(&result.output, TILE_CACHE_BLOCKS).map_err(|e| {
        Error::Merge(format!(
            "Cannot read output of tile {} ({}): {}",
            result.tile,
            result.output.display(),
            e
        ))
    })
}

/// Integer pixel offset of `value`, or `None` when off the lattice
fn lattice_offset(value: f64) -> Option<i64> {
    let rounded = value.round();
    ((value - rounded).abs() <= ALIGN_TOLERANCE).then_some(rounded as i64)
}

/// Pastes `tile` into `out`; pixels already holding data are kept
fn paste(out: &mut Raster, tile: &Raster, tile_nodata: Option<f64>, id: &ProcessingResult) -> Result<()> {
    let pixel = out.transform.pixel_size;
    let col_off = lattice_offset((tile.transform.origin_x - out.transform.origin_x) / pixel.width);
    let row_off = lattice_offset((out.transform.origin_y - tile.transform.origin_y) / pixel.height);
    let (Some(col_off), Some(row_off)) = (col_off, row_off) else {
        return Err(Error::Merge(format!("Tile {} is not aligned to the mosaic lattice", id.tile)));
    };

    for row in 0..tile.height as i64 {
        let out_row = row + row_off;
        if out_row < 0 || out_row >= out.height as i64 {
            continue;
        }
        for col in 0..tile.width as i64 {
            let out_col = col + col_off;
            if out_col < 0 || out_col >= out.width as i64 {
                continue;
            }
            let (c, r) = (col as u64, row as u64);
            let has_data = (0..tile.bands).any(|b| !is_nodata(tile.get(c, r, b), tile_nodata));
            if !has_data || !out.is_nodata_pixel(out_col as u64, out_row as u64) {
                continue;
            }
            out.pixel_mut(out_col as u64, out_row as u64).copy_from_slice(tile.pixel(c, r));
        }
    }
    Ok(())
}

/// Sets pixels whose centre lies outside the footprint to nodata
fn clip_to_footprint(out: &mut Raster, footprint: &Footprint) {
    let fill = encode_pixel(out.data_type, out.bands, out.nodata.unwrap_or(0.0));
    let transform = out.transform;
    let pixel_bytes = out.pixel_bytes();
    let row_bytes = out.row_bytes();
    out.data
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row, line)| {
            for (col, pixel) in line.chunks_exact_mut(pixel_bytes).enumerate() {
                let (x, y) = transform.pixel_center(col as u64, row as u64);
                if !footprint.contains_point(x, y) {
                    pixel.copy_from_slice(&fill);
                }
            }
        });
}

/// A successful tile placed on the mosaic lattice
struct PlacedTile<'a> {
    result: &'a ProcessingResult,
    tile: &'a TileSpec,
    /// Core position in mosaic pixels, possibly outside the mosaic
    col_off: i64,
    row_off: i64,
    width: u64,
    height: u64,
}

/// An open tile output and the window of its core
struct OpenTile<'a> {
    placed: &'a PlacedTile<'a>,
    source: RasterSource,
    window: PixelWindow,
}

impl OpenTile<'_> {
    fn row_end(&self) -> i64 {
        self.placed.row_off + self.placed.height as i64
    }

    /// Pastes the part of the core inside `band`
    fn paste_into(&self, band: &mut Raster, band_row: u64, nodata: f64) -> Result<()> {
        let placed = self.placed;
        let r0 = placed.row_off.max(band_row as i64);
        let r1 = self.row_end().min((band_row + band.height) as i64);
        let c0 = placed.col_off.max(0);
        let c1 = (placed.col_off + placed.width as i64).min(band.width as i64);
        if r0 >= r1 || c0 >= c1 {
            return Ok(());
        }
        let piece = self
            .source
            .read_window(
                self.window.col_off as i64 + (c0 - placed.col_off),
                self.window.row_off as i64 + (r0 - placed.row_off),
                (c1 - c0) as u64,
                (r1 - r0) as u64,
            )
            .map_err(|e| Error::Merge(format!("Reading core of tile {}: {}", placed.result.tile, e)))?;
        let tile_nodata = self.source.nodata().or(Some(nodata));
        paste(band, &piece, tile_nodata, placed.result)
    }
}

/// Receives the mosaic one band of rows at a time, top to bottom
trait BandSink {
    /// Rows per band; the last band may be shorter
    fn band_rows(&self) -> u64;

    fn put(&mut self, band: &Raster) -> Result<()>;
}

/// Collects bands into one raster
struct RasterSink {
    raster: Raster,
}

impl BandSink for RasterSink {
    fn band_rows(&self) -> u64 {
        MEMORY_BAND_ROWS
    }

    fn put(&mut self, band: &Raster) -> Result<()> {
        self.raster.data.extend_from_slice(&band.data);
        Ok(())
    }
}

impl<W: Write + Seek> BandSink for BlockWriter<W> {
    fn band_rows(&self) -> u64 {
        self.block_height() as u64
    }

    fn put(&mut self, band: &Raster) -> Result<()> {
        self.write_rows(&band.data)
    }
}

/// Lattice, layout and tile placement of a mosaic
struct Mosaic<'a> {
    tiles: Vec<PlacedTile<'a>>,
    transform: GeoTransform,
    width: u64,
    height: u64,
    bands: usize,
    data_type: DataType,
    epsg: Option<u32>,
}

impl<'a> Mosaic<'a> {
    /// Places the successful results on the lattice of the first one
    fn plan(results: &'a [ProcessingResult], grid: &'a Grid, options: &MergeOptions) -> Result<Self> {
        let successful: Vec<&ProcessingResult> = results.iter().filter(|r| r.is_success()).collect();
        let Some(first) = successful.first() else {
            return Err(Error::Merge("No successful tile output to merge".to_string()));
        };
        let reference = open_output(first)?;

        let pixel = reference.pixel_size();
        let extent = options.output_extent.unwrap_or(grid.data_extent).snap_outward(pixel);
        let width = (extent.width() / pixel.width).round() as u64;
        let height = (extent.height() / pixel.height).round() as u64;
        let transform = GeoTransform::new(extent.xmin, extent.ymax, pixel);

        let mut tiles = Vec::with_capacity(successful.len());
        for result in successful {
            let tile = grid
                .tile(&result.tile)
                .ok_or_else(|| Error::Merge(format!("Tile {} is not part of the grid", result.tile)))?;
            let (col, row) = transform.to_pixel(tile.core.xmin, tile.core.ymax);
            let (Some(col_off), Some(row_off)) = (lattice_offset(col), lattice_offset(row)) else {
                return Err(Error::Merge(format!("Tile {} is not aligned to the mosaic lattice", result.tile)));
            };
            let placed = PlacedTile {
                result,
                tile,
                col_off,
                row_off,
                width: (tile.core.width() / pixel.width).round() as u64,
                height: (tile.core.height() / pixel.height).round() as u64,
            };
            let inside = placed.row_off < height as i64
                && placed.row_off + placed.height as i64 > 0
                && placed.col_off < width as i64
                && placed.col_off + placed.width as i64 > 0;
            if inside {
                tiles.push(placed);
            } else {
                debug!(tile = %result.tile, "tile core lies outside the output extent");
            }
        }
        tiles.sort_by_key(|t| (t.row_off, t.result.tile));

        let epsg = match (options.target_epsg, reference.epsg()) {
            (Some(target), Some(code)) if code == target => Some(code),
            (Some(target), Some(code)) => {
                warn!(found = code, expected = target, "mosaic CRS differs from the input; restamping");
                Some(target)
            }
            (Some(target), None) => {
                warn!(expected = target, "tile outputs carry no CRS; restamping");
                Some(target)
            }
            (None, code) => code,
        };

        Ok(Self {
            tiles,
            transform,
            width,
            height,
            bands: reference.bands(),
            data_type: reference.data_type(),
            epsg,
        })
    }

    /// Rejects tile outputs whose lattice or samples differ from the mosaic
    fn check_consistent(&self, source: &RasterSource, tile: &ProcessingResult) -> Result<()> {
        let pixel = self.transform.pixel_size;
        if !pixel.approx_eq(&source.pixel_size()) {
            return Err(Error::Merge(format!(
                "Tile {} has pixel size {:?}, expected {:?}",
                tile.tile,
                source.pixel_size(),
                pixel
            )));
        }
        if source.data_type() != self.data_type || source.bands() != self.bands {
            return Err(Error::Merge(format!(
                "Tile {} holds {} band(s) of {}, expected {} band(s) of {}",
                tile.tile,
                source.bands(),
                source.data_type().name(),
                self.bands,
                self.data_type.name()
            )));
        }
        Ok(())
    }

    fn open<'t>(&self, placed: &'t PlacedTile<'t>) -> Result<OpenTile<'t>> {
        let source = open_output(placed.result)?;
        self.check_consistent(&source, placed.result)?;
        let window = source
            .transform()
            .aligned_window(&placed.tile.core, source.width(), source.height())
            .ok_or_else(|| {
                Error::Merge(format!(
                    "Output of tile {} is not aligned to the grid or does not cover its core extent {}",
                    placed.result.tile, placed.tile.core
                ))
            })?;
        debug!(tile = %placed.result.tile, ?window, "opened tile core");
        Ok(OpenTile { placed, source, window })
    }

    fn shape(&self) -> Result<ImageShape> {
        let dimension = |value: u64| {
            u32::try_from(value).map_err(|_| Error::Merge(format!("Mosaic dimension {} exceeds TIFF limits", value)))
        };
        Ok(ImageShape {
            width: dimension(self.width)?,
            height: dimension(self.height)?,
            bands: u16::try_from(self.bands).map_err(|_| Error::Merge(format!("{} bands", self.bands)))?,
            data_type: self.data_type,
        })
    }

    /// Pastes, clips and emits every band of the mosaic
    fn render(&self, options: &MergeOptions, sink: &mut dyn BandSink) -> Result<()> {
        let rows = sink.band_rows().max(1);
        let mut pending = self.tiles.iter().peekable();
        let mut open: Vec<OpenTile<'_>> = Vec::new();

        let mut band_row = 0;
        while band_row < self.height {
            let band_height = rows.min(self.height - band_row);
            let band_end = (band_row + band_height) as i64;
            while let Some(placed) = pending.next_if(|t| t.row_off < band_end) {
                open.push(self.open(placed)?);
            }

            let mut band = Raster::filled(
                self.width,
                band_height,
                self.bands,
                self.data_type,
                self.transform.shifted(0, band_row as i64),
                Some(options.nodata),
                self.epsg,
            );
            for tile in &open {
                tile.paste_into(&mut band, band_row, options.nodata)?;
            }
            if let Some(footprint) = &options.final_clip {
                clip_to_footprint(&mut band, footprint);
            }
            sink.put(&band)?;

            // Tiles whose core ends in this band are released
            open.retain(|tile| tile.row_end() > band_end);
            band_row += band_height;
        }
        Ok(())
    }

    fn info(&self) -> MosaicInfo {
        MosaicInfo {
            width: self.width,
            height: self.height,
            bands: self.bands,
            data_type: self.data_type,
            epsg: self.epsg,
            tiles: self.tiles.len(),
        }
    }
}

/// Combines successful tile outputs into one in-memory raster
pub fn merge(results: &[ProcessingResult], grid: &Grid, options: &MergeOptions) -> Result<Raster> {
    let mosaic = Mosaic::plan(results, grid, options)?;
    let mut sink = RasterSink {
        raster: Raster {
            width: mosaic.width,
            height: mosaic.height,
            bands: mosaic.bands,
            data_type: mosaic.data_type,
            transform: mosaic.transform,
            nodata: Some(options.nodata),
            epsg: mosaic.epsg,
            data: Vec::with_capacity(mosaic.width as usize * mosaic.height as usize * mosaic.bands * mosaic.data_type.size()),
        },
    };
    mosaic.render(options, &mut sink)?;
    info!(tiles = mosaic.tiles.len(), width = mosaic.width, height = mosaic.height, "merged tiles");
    Ok(sink.raster)
}

/// Path of the in-progress mosaic next to `path`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_mosaic(results: &[ProcessingResult], grid: &Grid, options: &MergeOptions, partial: &Path) -> Result<MosaicInfo> {
    let mosaic = Mosaic::plan(results, grid, options)?;
    let writer = GeoTiffWriter::new(options.compression).with_big_tiff(options.big_tiff);
    let mut sink = writer
        .create(partial, mosaic.shape()?, Some(options.nodata))
        .map_err(|e| Error::Merge(format!("Creating {}: {}", partial.display(), e)))?;
    mosaic.render(options, &mut sink)?;
    sink.finish(&mosaic.transform.to_georeference(mosaic.epsg))
        .map_err(|e| Error::Merge(format!("Writing {}: {}", partial.display(), e)))?;
    Ok(mosaic.info())
}

/// Merges and streams the mosaic to disk atomically
///
/// The file is written as `<path>.partial` and renamed on success; on any
/// failure the partial file is removed.
pub fn merge_to_file(
    results: &[ProcessingResult],
    grid: &Grid,
    options: &MergeOptions,
    path: &Path,
) -> Result<MosaicInfo> {
    let partial = partial_path(path);
    let outcome = (|| {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let info = write_mosaic(results, grid, options, &partial)?;
        fs::rename(&partial, path)
            .map_err(|e| Error::Merge(format!("Renaming {} to {}: {}", partial.display(), path.display(), e)))?;
        Ok(info)
    })();

    match &outcome {
        Ok(info) => info!(
            path = %path.display(),
            tiles = info.tiles,
            width = info.width,
            height = info.height,
            bands = info.bands,
            data_type = info.data_type.name(),
            "wrote mosaic"
        ),
        Err(_) if partial.exists() => {
            if let Err(e) = fs::remove_file(&partial) {
                warn!(path = %partial.display(), error = %e, "could not remove partial mosaic");
            }
        }
        Err(_) => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskStatus;
    use crate::grid::{compute_grid, GridOptions, PixelSize, TileSize};
    use crate::types::DataType;
    use crate::vector::{Feature, FeatureCollection, Geometry};
    use tempfile::TempDir;

    fn grid(overlap: u32) -> Grid {
        compute_grid(
            Extent::new(0.0, 20.0, 0.0, 12.0).unwrap(),
            PixelSize::square(1.0).unwrap(),
            TileSize::new(8, 8),
            overlap,
            GridOptions::default(),
        )
        .unwrap()
    }

    /// `width` x `height` I16 raster at the origin, column 7 nodata
    fn sample_raster(width: u64, height: u64) -> Raster {
        let transform = GeoTransform::new(0.0, height as f64, PixelSize::square(1.0).unwrap());
        let mut raster = Raster::filled(width, height, 1, DataType::I16, transform, Some(-9999.0), Some(2154));
        for row in 0..height {
            for col in 0..width {
                if col != 7 {
                    raster.set(col, row, 0, ((row * width + col) % 30_000) as f64);
                }
            }
        }
        raster
    }

    fn reference() -> Raster {
        sample_raster(20, 12)
    }

    /// Writes each tile's buffered window of `source` as its output
    fn tile_outputs(dir: &Path, grid: &Grid, source: &Raster) -> Vec<ProcessingResult> {
        grid.tiles()
            .iter()
            .map(|tile| {
                let output = dir.join(format!("out_{}.tif", tile.id));
                source.crop(&tile.buffered_window).unwrap().write_geotiff(&output, Compression::Deflate).unwrap();
                ProcessingResult {
                    tile: tile.id,
                    output,
                    status: TaskStatus::Success,
                    error: None,
                }
            })
            .collect()
    }

    fn options() -> MergeOptions {
        MergeOptions {
            nodata: -9999.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_reproduces_source() {
        for overlap in [0, 3] {
            let dir = TempDir::new().unwrap();
            let grid = grid(overlap);
            let source = reference();
            let results = tile_outputs(dir.path(), &grid, &source);
            let merged = merge(&results, &grid, &options()).unwrap();
            assert_eq!(merged, source, "overlap {}", overlap);
        }
    }

    #[test]
    fn test_skipped_tiles_stay_nodata() {
        let dir = TempDir::new().unwrap();
        let grid = grid(2);
        let mut results = tile_outputs(dir.path(), &grid, &reference());
        results[0].status = TaskStatus::Skipped;
        let merged = merge(&results, &grid, &options()).unwrap();
        assert!(merged.is_nodata_pixel(0, 0));
        assert!(merged.is_nodata_pixel(7, 7));
        assert_eq!(merged.get(8, 0, 0), 8.0);
    }

    #[test]
    fn test_misaligned_tile_is_merge_error() {
        let dir = TempDir::new().unwrap();
        let grid = grid(0);
        let mut results = tile_outputs(dir.path(), &grid, &reference());
        let shifted = GeoTransform::new(0.5, 12.0, PixelSize::square(1.0).unwrap());
        Raster::filled(8, 8, 1, DataType::I16, shifted, None, None)
            .write_geotiff(&results[0].output, Compression::None)
            .unwrap();
        results.truncate(2);
        assert!(matches!(merge(&results, &grid, &options()), Err(Error::Merge(_))));
    }

    #[test]
    fn test_inconsistent_data_type_is_merge_error() {
        let dir = TempDir::new().unwrap();
        let grid = grid(0);
        let results = tile_outputs(dir.path(), &grid, &reference());
        let tile = grid.tiles()[1].clone();
        let transform = GeoTransform::new(tile.core.xmin, tile.core.ymax, PixelSize::square(1.0).unwrap());
        Raster::filled(8, 8, 1, DataType::F32, transform, None, None)
            .write_geotiff(&results[1].output, Compression::None)
            .unwrap();
        let err = merge(&results, &grid, &options()).unwrap_err();
        assert!(err.to_string().contains("r001_c002"));
    }

    #[test]
    fn test_final_clip_and_projection_guard() {
        let dir = TempDir::new().unwrap();
        let grid = grid(1);
        let mut source = reference();
        source.epsg = None;
        let results = tile_outputs(dir.path(), &grid, &source);

        let west_half = Geometry::from_extent(&Extent::new(0.0, 10.0, 0.0, 12.0).unwrap());
        let footprint = Footprint::from_collection(&FeatureCollection::new(vec![Feature::new(west_half)])).unwrap();
        let options = MergeOptions {
            final_clip: Some(footprint),
            target_epsg: Some(2154),
            ..options()
        };
        let merged = merge(&results, &grid, &options).unwrap();
        assert_eq!(merged.epsg, Some(2154));
        assert_eq!(merged.get(9, 3, 0), 69.0);
        assert!(merged.is_nodata_pixel(10, 3));
    }

    #[test]
    fn test_merge_to_file_is_atomic() {
        let dir = TempDir::new().unwrap();
        let grid = grid(2);
        let results = tile_outputs(dir.path(), &grid, &reference());
        let path = dir.path().join("out").join("mosaic.tif");

        merge_to_file(&results, &grid, &options(), &path).unwrap();
        assert!(path.exists());
        assert!(!partial_path(&path).exists());
        assert_eq!(Raster::read(&path).unwrap(), reference());

        let failed_path = dir.path().join("failed.tif");
        let mut broken = results.clone();
        fs::write(&broken[2].output, b"not a tiff").unwrap();
        broken[2].status = TaskStatus::Success;
        assert!(merge_to_file(&broken, &grid, &options(), &failed_path).is_err());
        assert!(!failed_path.exists());
        assert!(!partial_path(&failed_path).exists());
    }

    #[test]
    fn test_tall_mosaic_is_streamed_in_bands() {
        let dir = TempDir::new().unwrap();
        let source = sample_raster(20, 600);
        let grid = compute_grid(
            Extent::new(0.0, 20.0, 0.0, 600.0).unwrap(),
            PixelSize::square(1.0).unwrap(),
            TileSize::new(8, 100),
            3,
            GridOptions::default(),
        )
        .unwrap();
        let results = tile_outputs(dir.path(), &grid, &source);
        let path = dir.path().join("tall.tif");
        let options = MergeOptions {
            big_tiff: BigTiff::Always,
            ..options()
        };

        let info = merge_to_file(&results, &grid, &options, &path).unwrap();
        assert_eq!((info.width, info.height, info.tiles), (20, 600, 18));
        assert!(crate::formats::tiff::TiffReader::open(&path).unwrap().is_big_tiff());
        assert_eq!(Raster::read(&path).unwrap(), source);
        assert_eq!(merge(&results, &grid, &options).unwrap(), source);
    }

    #[test]
    fn test_output_extent_drops_outside_tiles() {
        let dir = TempDir::new().unwrap();
        let grid = grid(1);
        let source = reference();
        let results = tile_outputs(dir.path(), &grid, &source);
        let options = MergeOptions {
            output_extent: Some(Extent::new(0.0, 8.0, 4.0, 12.0).unwrap()),
            ..options()
        };
        let merged = merge(&results, &grid, &options).unwrap();
        assert_eq!((merged.width, merged.height), (8, 8));
        assert_eq!(merged, source.crop(&PixelWindow::new(0, 0, 8, 8)).unwrap());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(partial_path(Path::new("out/m.tif")), PathBuf::from("out/m.tif.partial"));
    }
}
