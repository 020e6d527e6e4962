//! Vector tile extraction

use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::grid::TileSpec;
use crate::vector::{clip_to_extent, FeatureCollection};

/// Options of vector tile extraction
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorOptions {
    /// Distance the per-tile operation will buffer features by
    pub prebuffer: Option<f64>,
}

/// Result of extracting one vector tile
#[derive(Debug, Clone, PartialEq)]
pub enum VectorOutcome {
    Features(FeatureCollection),
    /// No feature reaches into the tile
    Empty,
}

/// Clips features to a tile's buffered extent
///
/// With a prebuffer distance the clip window grows by that distance, so
/// features whose buffer reaches the tile keep enough geometry.
pub fn extract_vector(source: &FeatureCollection, tile: &TileSpec, options: &VectorOptions) -> Result<VectorOutcome> {
    let window = match options.prebuffer {
        Some(d) if d > 0.0 => tile.buffered.expand(d, d),
        _ => tile.buffered,
    };

    let clipped = clip_to_extent(source, &window)?;
    if clipped.is_empty() {
        return Ok(VectorOutcome::Empty);
    }
    Ok(VectorOutcome::Features(clipped))
}
