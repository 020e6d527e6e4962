//! Tile grid: extents, planning, tile ids and per-layer tile sets

pub mod addressing;
pub mod extent;
pub mod layers;
pub mod planner;

use serde::{Deserialize, Serialize};
use serde_json::json;
use crate::vector::{Feature, FeatureCollection, Geometry};

pub use addressing::TileId;
pub use extent::{Extent, PixelSize};
pub use layers::{join_layers, LayerTileSet, TileEntry};
pub use planner::{compute_grid, BufferFormula, GridOptions, RemainderPolicy};

/// Tile edge lengths in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

/// Rectangle of pixels, offsets counted from the top-left of its raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: u64,
    pub row_off: u64,
    pub width: u64,
    pub height: u64,
}

impl PixelWindow {
    pub fn new(col_off: u64, row_off: u64, width: u64, height: u64) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn col_end(&self) -> u64 {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> u64 {
        self.row_off + self.height
    }

    pub fn pixel_count(&self) -> u64 {
        self.width * self.height
    }

    pub fn contains(&self, other: &PixelWindow) -> bool {
        other.col_off >= self.col_off
            && other.row_off >= self.row_off
            && other.col_end() <= self.col_end()
            && other.row_end() <= self.row_end()
    }

    /// Grows each side by the margins without leaving `0..max_cols` x `0..max_rows`
    pub fn grow_clamped(&self, margin_x: u64, margin_y: u64, max_cols: u64, max_rows: u64) -> PixelWindow {
        let col_off = self.col_off.saturating_sub(margin_x);
        let row_off = self.row_off.saturating_sub(margin_y);
        let col_end = (self.col_end() + margin_x).min(max_cols);
        let row_end = (self.row_end() + margin_y).min(max_rows);
        PixelWindow::new(col_off, row_off, col_end - col_off, row_end - row_off)
    }
}

/// One tile of a grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSpec {
    pub id: TileId,
    /// Non-overlapping extent; cores partition the working extent
    pub core: Extent,
    /// Core grown by the overlap and clamped to the working extent
    pub buffered: Extent,
    pub core_window: PixelWindow,
    pub buffered_window: PixelWindow,
}

impl TileSpec {
    pub fn row(&self) -> u32 {
        self.id.row
    }

    pub fn col(&self) -> u32 {
        self.id.col
    }

    /// Whether the tile carries any buffer beyond its core
    pub fn is_buffered(&self) -> bool {
        self.core_window != self.buffered_window
    }
}

/// Immutable row-major set of tiles covering a working extent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Extent covered by the union of tile cores
    pub working_extent: Extent,
    /// Input extent snapped to the pixel lattice
    pub data_extent: Extent,
    pub pixel_size: PixelSize,
    pub tile_size: TileSize,
    pub overlap: u32,
    pub options: GridOptions,
    pub rows: u32,
    pub cols: u32,
    tiles: Vec<TileSpec>,
}

impl Grid {
    pub fn tiles(&self) -> &[TileSpec] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Looks up a tile by id
    pub fn tile(&self, id: &TileId) -> Option<&TileSpec> {
        if id.row == 0 || id.col == 0 || id.row > self.rows || id.col > self.cols {
            return None;
        }
        let index = (id.row - 1) as usize * self.cols as usize + (id.col - 1) as usize;
        self.tiles.get(index)
    }

    /// Working extent width in pixels
    pub fn width_px(&self) -> u64 {
        self.tiles.last().map_or(0, |t| t.core_window.col_end())
    }

    /// Working extent height in pixels
    pub fn height_px(&self) -> u64 {
        self.tiles.last().map_or(0, |t| t.core_window.row_end())
    }

    /// Exports tile cores as polygons with `tile_id`, `row` and `col` properties
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .tiles
            .iter()
            .map(|tile| {
                let mut feature = Feature::new(Geometry::from_extent(&tile.core));
                feature.set_property("tile_id", json!(tile.id.to_string()));
                feature.set_property("row", json!(tile.id.row));
                feature.set_property("col", json!(tile.id.col));
                feature
            })
            .collect();
        FeatureCollection::new(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_grow_clamped() {
        let w = PixelWindow::new(5, 0, 10, 10);
        assert_eq!(w.grow_clamped(8, 3, 18, 100), PixelWindow::new(0, 0, 18, 13));
        assert!(w.grow_clamped(1, 1, 100, 100).contains(&w));
    }

    #[test]
    fn test_grid_lookup_and_export() {
        let grid = compute_grid(
            Extent::new(0.0, 10.0, 0.0, 6.0).unwrap(),
            PixelSize::square(1.0).unwrap(),
            TileSize::new(4, 4),
            1,
            GridOptions::default(),
        )
        .unwrap();
        assert_eq!((grid.rows, grid.cols), (2, 3));
        assert_eq!((grid.width_px(), grid.height_px()), (10, 6));
        assert!(grid.tile(&TileId::new(3, 1)).is_none());
        assert_eq!(grid.tile(&TileId::new(2, 3)).unwrap().core_window, PixelWindow::new(8, 4, 2, 2));

        let fc = grid.to_feature_collection();
        assert_eq!(fc.features.len(), 6);
        let first = &fc.features[0];
        assert_eq!(first.property("tile_id"), Some(&json!("r001_c001")));
        assert_eq!(first.property("col"), Some(&json!(1)));
    }
}
