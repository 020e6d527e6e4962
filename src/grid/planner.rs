//! Grid planning: partition an extent into overlapping tiles
//!
//! All tile edges are derived from integer pixel offsets against one origin,
//! so neighbouring cores share bit-identical edges and their union is the
//! working extent.

use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{Error, Result};
use super::{Extent, Grid, PixelSize, PixelWindow, TileId, TileSize, TileSpec};

/// How the last row and column are handled when the extent is not a tile multiple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemainderPolicy {
    /// Shrink the last tiles to end at the extent
    #[default]
    Clamp,
    /// Keep full tiles and grow the working extent east and south
    Extend,
}

/// How the buffer margin of each tile edge is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferFormula {
    /// `overlap * pixel_width` on x edges, `overlap * pixel_height` on y edges
    #[default]
    Symmetric,
    /// `overlap * pixel_width` on every edge; the y margin is rounded out to whole pixels
    LegacyXResolution,
}

/// Grid planning options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridOptions {
    #[serde(default)]
    pub remainder: RemainderPolicy,
    #[serde(default)]
    pub buffer: BufferFormula,
}

/// Computes the tile grid covering `extent`
pub fn compute_grid(
    extent: Extent,
    pixel_size: PixelSize,
    tile_size: TileSize,
    overlap: u32,
    options: GridOptions,
) -> Result<Grid> {
    let extent = Extent::new(extent.xmin, extent.xmax, extent.ymin, extent.ymax)?;
    let pixel_size = PixelSize::new(pixel_size.width, pixel_size.height)?;
    if tile_size.width == 0 || tile_size.height == 0 {
        return Err(Error::Configuration(format!(
            "Tile size must be positive, got {} x {}",
            tile_size.width, tile_size.height
        )));
    }

    let snapped = extent.snap_outward(pixel_size);
    let data_cols = (snapped.width() / pixel_size.width).round() as u64;
    let data_rows = (snapped.height() / pixel_size.height).round() as u64;
    if data_cols == 0 || data_rows == 0 {
        return Err(Error::Configuration(format!(
            "Extent {} is smaller than one pixel",
            extent
        )));
    }

    let tile_cols = data_cols.div_ceil(tile_size.width as u64);
    let tile_rows = data_rows.div_ceil(tile_size.height as u64);
    let (width_px, height_px) = match options.remainder {
        RemainderPolicy::Clamp => (data_cols, data_rows),
        RemainderPolicy::Extend => (
            tile_cols * tile_size.width as u64,
            tile_rows * tile_size.height as u64,
        ),
    };
    if tile_cols > u32::MAX as u64 || tile_rows > u32::MAX as u64 {
        return Err(Error::Configuration("Grid has too many tiles".to_string()));
    }

    let lattice = Lattice {
        origin_x: snapped.xmin,
        origin_y: snapped.ymax,
        pixel_size,
    };
    let working_extent = lattice.extent_of(&PixelWindow::new(0, 0, width_px, height_px));
    let data_extent = lattice.extent_of(&PixelWindow::new(0, 0, data_cols, data_rows));

    let (margin_x, margin_y) = margins(overlap, pixel_size, options.buffer);

    let mut tiles = Vec::with_capacity((tile_rows * tile_cols) as usize);
    for r in 0..tile_rows {
        for c in 0..tile_cols {
            let col_off = c * tile_size.width as u64;
            let row_off = r * tile_size.height as u64;
            let core_window = PixelWindow::new(
                col_off,
                row_off,
                (tile_size.width as u64).min(width_px - col_off),
                (tile_size.height as u64).min(height_px - row_off),
            );
            let buffered_window = core_window.grow_clamped(margin_x, margin_y, width_px, height_px);

            tiles.push(TileSpec {
                id: TileId::new(r as u32 + 1, c as u32 + 1),
                core: lattice.extent_of(&core_window),
                buffered: lattice.extent_of(&buffered_window),
                core_window,
                buffered_window,
            });
        }
    }

    debug!(
        rows = tile_rows,
        cols = tile_cols,
        width_px,
        height_px,
        "computed tile grid"
    );

    Ok(Grid {
        working_extent,
        data_extent,
        pixel_size,
        tile_size,
        overlap,
        options,
        rows: tile_rows as u32,
        cols: tile_cols as u32,
        tiles,
    })
}

/// Buffer margin per edge in whole pixels (x, y)
fn margins(overlap: u32, pixel_size: PixelSize, formula: BufferFormula) -> (u64, u64) {
    let overlap = overlap as u64;
    match formula {
        BufferFormula::Symmetric => (overlap, overlap),
        BufferFormula::LegacyXResolution => {
            let literal = overlap as f64 * pixel_size.width / pixel_size.height;
            let rows = (literal - super::extent::SNAP_TOLERANCE).ceil().max(0.0) as u64;
            (overlap, rows)
        }
    }
}

/// Maps pixel windows of the working grid to projected extents
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lattice {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: PixelSize,
}

impl Lattice {
    pub fn extent_of(&self, window: &PixelWindow) -> Extent {
        Extent {
            xmin: self.origin_x + window.col_off as f64 * self.pixel_size.width,
            xmax: self.origin_x + window.col_end() as f64 * self.pixel_size.width,
            ymin: self.origin_y - window.row_end() as f64 * self.pixel_size.height,
            ymax: self.origin_y - window.row_off as f64 * self.pixel_size.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scenario_a(remainder: RemainderPolicy) -> Grid {
        compute_grid(
            Extent::new(0.0, 1000.0, 0.0, 1000.0).unwrap(),
            PixelSize::square(1.0).unwrap(),
            TileSize::square(300),
            10,
            GridOptions {
                remainder,
                buffer: BufferFormula::Symmetric,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_clamp_shrinks_last_tiles() {
        let grid = scenario_a(RemainderPolicy::Clamp);
        assert_eq!((grid.rows, grid.cols), (4, 4));
        assert_eq!(grid.len(), 16);
        assert_eq!(grid.working_extent, Extent::new(0.0, 1000.0, 0.0, 1000.0).unwrap());

        let last = grid.tile(&TileId::new(4, 4)).unwrap();
        assert_eq!(last.core_window.width, 100);
        assert_eq!(last.core_window.height, 100);
        assert_eq!(last.core, Extent::new(900.0, 1000.0, 0.0, 100.0).unwrap());
        assert_eq!(last.buffered, Extent::new(890.0, 1000.0, 0.0, 110.0).unwrap());
    }

    #[test]
    fn test_extend_grows_working_extent() {
        let grid = scenario_a(RemainderPolicy::Extend);
        assert_eq!((grid.rows, grid.cols), (4, 4));
        assert_eq!(grid.working_extent, Extent::new(0.0, 1200.0, -200.0, 1000.0).unwrap());
        assert_eq!(grid.data_extent, Extent::new(0.0, 1000.0, 0.0, 1000.0).unwrap());
        for tile in grid.tiles() {
            assert_eq!((tile.core_window.width, tile.core_window.height), (300, 300));
        }
        let last = grid.tile(&TileId::new(4, 4)).unwrap();
        assert_eq!(last.buffered, Extent::new(890.0, 1200.0, -200.0, 110.0).unwrap());
    }

    #[test]
    fn test_row_one_is_north() {
        let grid = scenario_a(RemainderPolicy::Clamp);
        let first = grid.tile(&TileId::new(1, 1)).unwrap();
        assert_eq!(first.core, Extent::new(0.0, 300.0, 700.0, 1000.0).unwrap());
        assert_eq!(first.buffered, Extent::new(0.0, 310.0, 690.0, 1000.0).unwrap());
        assert_eq!(grid.tiles()[1].id, TileId::new(1, 2));
    }

    #[test]
    fn test_interior_buffer_reaches_into_neighbours() {
        let grid = scenario_a(RemainderPolicy::Clamp);
        let tile = grid.tile(&TileId::new(2, 2)).unwrap();
        assert_eq!(tile.core, Extent::new(300.0, 600.0, 400.0, 700.0).unwrap());
        assert_eq!(tile.buffered, Extent::new(290.0, 610.0, 390.0, 710.0).unwrap());
        assert_eq!(tile.buffered_window, PixelWindow::new(290, 290, 320, 320));
    }

    #[test]
    fn test_legacy_formula_with_non_square_pixels() {
        // 2 m wide, 0.5 m tall pixels: the legacy y margin is 10 * 2 m = 20 m = 40 rows
        let grid = compute_grid(
            Extent::new(0.0, 200.0, 0.0, 100.0).unwrap(),
            PixelSize::new(2.0, 0.5).unwrap(),
            TileSize::new(50, 100),
            10,
            GridOptions {
                remainder: RemainderPolicy::Clamp,
                buffer: BufferFormula::LegacyXResolution,
            },
        )
        .unwrap();
        let tile = grid.tile(&TileId::new(2, 1)).unwrap();
        assert_eq!(tile.core, Extent::new(0.0, 100.0, 0.0, 50.0).unwrap());
        assert_eq!(tile.buffered, Extent::new(0.0, 120.0, 0.0, 70.0).unwrap());

        let symmetric = compute_grid(
            Extent::new(0.0, 200.0, 0.0, 100.0).unwrap(),
            PixelSize::new(2.0, 0.5).unwrap(),
            TileSize::new(50, 100),
            10,
            GridOptions::default(),
        )
        .unwrap();
        let tile = symmetric.tile(&TileId::new(2, 1)).unwrap();
        assert_eq!(tile.buffered, Extent::new(0.0, 120.0, 0.0, 55.0).unwrap());
    }

    #[test]
    fn test_legacy_margin_rounds_out() {
        let pixel = PixelSize::new(1.0, 3.0).unwrap();
        assert_eq!(margins(10, pixel, BufferFormula::LegacyXResolution), (10, 4));
        assert_eq!(margins(10, pixel, BufferFormula::Symmetric), (10, 10));
    }

    #[test]
    fn test_invalid_inputs() {
        let extent = Extent::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let pixel = PixelSize::square(1.0).unwrap();
        assert!(matches!(
            compute_grid(extent, pixel, TileSize::new(0, 5), 0, GridOptions::default()),
            Err(Error::Configuration(_))
        ));
        let bad_pixel = PixelSize { width: 0.0, height: 1.0 };
        assert!(compute_grid(extent, bad_pixel, TileSize::square(5), 0, GridOptions::default()).is_err());
        let bad_extent = Extent { xmin: 5.0, xmax: 5.0, ymin: 0.0, ymax: 1.0 };
        assert!(compute_grid(bad_extent, pixel, TileSize::square(5), 0, GridOptions::default()).is_err());
    }

    #[test]
    fn test_zero_overlap_buffer_equals_core() {
        let grid = compute_grid(
            Extent::new(0.0, 10.0, 0.0, 10.0).unwrap(),
            PixelSize::square(1.0).unwrap(),
            TileSize::square(4),
            0,
            GridOptions::default(),
        )
        .unwrap();
        assert!(grid.tiles().iter().all(|t| t.core == t.buffered));
    }

    proptest! {
        #[test]
        fn prop_cores_partition_working_extent(
            xmin in -5000i32..5000,
            ymin in -5000i32..5000,
            width in 1u32..200,
            height in 1u32..200,
            tile_w in 1u32..80,
            tile_h in 1u32..80,
            overlap in 0u32..30,
            pixel in prop::sample::select(vec![0.25f64, 0.5, 1.0, 2.0, 10.0]),
            extend in any::<bool>(),
        ) {
            let extent = Extent::new(
                xmin as f64 * pixel,
                (xmin as f64 + width as f64) * pixel,
                ymin as f64 * pixel,
                (ymin as f64 + height as f64) * pixel,
            ).unwrap();
            let options = GridOptions {
                remainder: if extend { RemainderPolicy::Extend } else { RemainderPolicy::Clamp },
                buffer: BufferFormula::Symmetric,
            };
            let grid = compute_grid(
                extent,
                PixelSize::square(pixel).unwrap(),
                TileSize::new(tile_w, tile_h),
                overlap,
                options,
            ).unwrap();

            // Core windows tile the working window exactly once
            let total_w = grid.width_px();
            let total_h = grid.height_px();
            let mut cover = vec![0u8; (total_w * total_h) as usize];
            for tile in grid.tiles() {
                let w = tile.core_window;
                for row in w.row_off..w.row_end() {
                    for col in w.col_off..w.col_end() {
                        cover[(row * total_w + col) as usize] += 1;
                    }
                }
                prop_assert!(tile.buffered.contains(&tile.core));
                prop_assert!(grid.working_extent.contains(&tile.buffered));
                prop_assert!(tile.buffered_window.col_off + overlap as u64 >= w.col_off);
                prop_assert!(tile.buffered_window.col_end() <= (w.col_end() + overlap as u64).min(total_w));
            }
            prop_assert!(cover.iter().all(|&n| n == 1));
            prop_assert!(grid.working_extent.contains(&extent.snap_outward(grid.pixel_size)));
        }
    }
}
