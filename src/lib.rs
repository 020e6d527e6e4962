//! tilemosaic - tiled processing of large georeferenced rasters
//!
//! A raster extent is partitioned into a grid of overlapping tiles, every
//! input layer is cut to that grid, an external operation runs once per
//! tile in parallel, and the tile cores are merged back into one GeoTIFF.
//!
//! # Examples
//!
//! ```no_run
//! use tilemosaic::{Config, TilePipeline};
//!
//! let config = Config::from_file("run.toml")?;
//! let report = TilePipeline::new(config).run_configured()?;
//! println!("{}", report);
//! # Ok::<(), tilemosaic::Error>(())
//! ```
//!
//! Planning a grid on its own:
//!
//! ```
//! use tilemosaic::grid::{compute_grid, Extent, GridOptions, PixelSize, TileSize};
//!
//! let grid = compute_grid(
//!     Extent::new(0.0, 1000.0, 0.0, 1000.0)?,
//!     PixelSize::square(1.0)?,
//!     TileSize::square(300),
//!     10,
//!     GridOptions::default(),
//! )?;
//! assert_eq!((grid.rows, grid.cols), (4, 4));
//! # Ok::<(), tilemosaic::Error>(())
//! ```

pub mod io;
pub mod error;
pub mod types;
pub mod formats;
pub mod compression;
pub mod cache;
pub mod grid;
pub mod raster;
pub mod vector;
pub mod extract;
pub mod executor;
pub mod mosaic;
pub mod manifest;
pub mod pipeline;
pub mod config;
pub mod logging;

pub use error::{Error, Result};
pub use types::DataType;
pub use compression::Compression;
pub use formats::tiff::{GeoInfo, ImageInfo, Tiff, TiffReader};
pub use grid::{compute_grid, Extent, Grid, GridOptions, PixelSize, TileId, TileSize, TileSpec};
pub use raster::{GeoTransform, Raster, RasterSource};
pub use vector::{Feature, FeatureCollection, Footprint, Geometry};
pub use extract::{LayerInput, TileExtractor};
pub use executor::{
    CommandOperation, CommandSpec, CopyOperation, ExecutorConfig, FailurePolicy, ParallelExecutor,
    ProcessingResult, Scheduling, TaskStatus, TileJob, TileOperation,
};
pub use mosaic::{merge, merge_to_file, MergeOptions, MosaicInfo};
pub use config::Config;
pub use pipeline::{build_operation, RunReport, TilePipeline};
