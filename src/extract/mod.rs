//! Per-tile extraction of raster and vector layers

pub mod raster;
pub mod vector;

use std::fs;
use std::path::{Path, PathBuf};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::grid::{Grid, LayerTileSet, TileEntry, TileSpec};
use crate::raster::RasterSource;
use crate::vector::reproject::reproject_collection;
use crate::vector::FeatureCollection;

pub use self::raster::{extract_raster, ExtractOutcome, Resampling};
pub use self::vector::{extract_vector, VectorOptions, VectorOutcome};

/// Data of one input layer
pub enum LayerData {
    Raster(RasterSource),
    Vector(FeatureCollection),
}

/// An input layer to cut into tiles
pub struct LayerInput {
    pub name: String,
    pub data: LayerData,
    pub resampling: Resampling,
    pub vector: VectorOptions,
    /// CRS of a vector layer when the file does not name one
    pub epsg: Option<u32>,
}

impl LayerInput {
    pub fn raster(name: impl Into<String>, source: RasterSource) -> Self {
        Self {
            name: name.into(),
            data: LayerData::Raster(source),
            resampling: Resampling::default(),
            vector: VectorOptions::default(),
            epsg: None,
        }
    }

    pub fn vector(name: impl Into<String>, collection: FeatureCollection) -> Self {
        Self {
            name: name.into(),
            data: LayerData::Vector(collection),
            resampling: Resampling::default(),
            vector: VectorOptions::default(),
            epsg: None,
        }
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    pub fn with_vector_options(mut self, options: VectorOptions) -> Self {
        self.vector = options;
        self
    }

    pub fn with_epsg(mut self, epsg: Option<u32>) -> Self {
        self.epsg = epsg;
        self
    }

    /// Declared or embedded EPSG code of the layer
    pub fn layer_epsg(&self) -> Option<u32> {
        match &self.data {
            LayerData::Raster(source) => source.epsg(),
            LayerData::Vector(collection) => self.epsg.or_else(|| collection.epsg()),
        }
    }

    /// File extension of this layer's tiles
    pub fn extension(&self) -> &'static str {
        match self.data {
            LayerData::Raster(_) => "tif",
            LayerData::Vector(_) => "geojson",
        }
    }
}

/// Path of one tile file: `<dir>/<layer>_<tile id>.<ext>`
pub fn tile_path(dir: &Path, layer: &str, tile: &TileSpec, extension: &str) -> PathBuf {
    dir.join(format!("{}_{}.{}", layer, tile.id, extension))
}

/// Cuts layers into tile files on a grid
#[derive(Debug, Clone, Copy)]
pub struct TileExtractor {
    /// Nodata written into raster tiles
    pub nodata: f64,
    pub compression: Compression,
    /// CRS of the grid, when known
    pub epsg: Option<u32>,
}

impl TileExtractor {
    pub fn new(nodata: f64, compression: Compression, epsg: Option<u32>) -> Self {
        Self {
            nodata,
            compression,
            epsg,
        }
    }

    /// Extracts every tile of a layer into `dir`, tiles in parallel
    ///
    /// Tiles that miss the layer are recorded as empty. The first I/O or
    /// decode failure aborts extraction of the layer.
    pub fn extract_layer(&self, layer: &LayerInput, grid: &Grid, dir: &Path) -> Result<LayerTileSet> {
        let Some(first) = grid.tiles().first() else {
            return Ok(LayerTileSet::new(layer.name.as_str()));
        };
        fs::create_dir_all(dir)?;

        let reprojected;
        let data = match (&layer.data, layer.layer_epsg(), self.epsg) {
            (LayerData::Raster(_), Some(from), Some(to)) if from != to => {
                return Err(Error::extraction(
                    first.id,
                    &layer.name,
                    format!("raster is in EPSG:{} but the grid is in EPSG:{}", from, to),
                ));
            }
            (LayerData::Vector(collection), Some(from), Some(to)) if from != to => {
                reprojected = reproject_collection(collection.clone(), from, to)
                    .map_err(|e| Error::extraction(first.id, &layer.name, e))?;
                LayerSourceRef::Vector(&reprojected)
            }
            (LayerData::Raster(source), _, _) => LayerSourceRef::Raster(source),
            (LayerData::Vector(collection), _, _) => LayerSourceRef::Vector(collection),
        };

        let entries: Vec<(TileSpec, TileEntry)> = grid
            .tiles()
            .par_iter()
            .map(|tile| {
                let path = tile_path(dir, &layer.name, tile, layer.extension());
                let entry = self
                    .extract_tile(&data, layer, grid, tile, &path)
                    .map_err(|e| Error::extraction(tile.id, &layer.name, e))?;
                Ok((tile.clone(), entry))
            })
            .collect::<Result<_>>()?;

        let mut set = LayerTileSet::new(layer.name.as_str());
        for (tile, entry) in entries {
            if entry == TileEntry::Empty {
                debug!(layer = %layer.name, tile = %tile.id, "tile does not intersect layer");
            }
            set.insert(tile.id, entry);
        }

        let empty = set.empty_count();
        if empty == set.len() {
            warn!(layer = %layer.name, "no tile intersects the layer");
        }
        info!(layer = %layer.name, tiles = set.len(), empty, dir = %dir.display(), "extracted layer");
        Ok(set)
    }

    fn extract_tile(
        &self,
        data: &LayerSourceRef<'_>,
        layer: &LayerInput,
        grid: &Grid,
        tile: &TileSpec,
        path: &Path,
    ) -> Result<TileEntry> {
        match data {
            LayerSourceRef::Raster(source) => {
                match extract_raster(source, tile, grid.pixel_size, self.nodata, layer.resampling)? {
                    ExtractOutcome::Raster(raster) => {
                        raster.write_geotiff(path, self.compression)?;
                        Ok(TileEntry::File(path.to_path_buf()))
                    }
                    ExtractOutcome::Empty => Ok(TileEntry::Empty),
                }
            }
            LayerSourceRef::Vector(collection) => match extract_vector(collection, tile, &layer.vector)? {
                VectorOutcome::Features(mut features) => {
                    if let Some(code) = self.epsg.or(layer.layer_epsg()) {
                        features.set_epsg(code);
                    }
                    features.write(path)?;
                    Ok(TileEntry::File(path.to_path_buf()))
                }
                VectorOutcome::Empty => Ok(TileEntry::Empty),
            },
        }
    }
}

enum LayerSourceRef<'a> {
    Raster(&'a RasterSource),
    Vector(&'a FeatureCollection),
}
