//! End-to-end run: plan, extract, process, record and merge

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use crate::config::{Config, LayerConfig, LayerKind, OperationConfig};
use crate::error::{Error, Result};
use crate::executor::{
    CommandOperation, CopyOperation, ParallelExecutor, ProcessingResult, TaskStatus, TileJob, TileOperation,
};
use crate::extract::{tile_path, LayerData, LayerInput, TileExtractor};
use crate::grid::{compute_grid, join_layers, Grid};
use crate::manifest::{read_manifest, write_manifest};
use crate::mosaic::{merge_to_file, partial_path, MergeOptions};
use crate::raster::RasterSource;
use crate::vector::{FeatureCollection, Footprint};

/// File name prefix of per-tile operation outputs
const RESULT_PREFIX: &str = "result";

/// Summary of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub tiles: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Mosaic path, once written
    pub output: Option<PathBuf>,
    pub elapsed: Duration,
}

impl RunReport {
    fn from_results(results: &[ProcessingResult], output: Option<PathBuf>, elapsed: Duration) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            tiles: results.len(),
            succeeded: count(TaskStatus::Success),
            skipped: count(TaskStatus::Skipped),
            failed: count(TaskStatus::Failed),
            output,
            elapsed,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Tiles: {} ({} succeeded, {} skipped, {} failed)",
            self.tiles, self.succeeded, self.skipped, self.failed
        )?;
        if let Some(output) = &self.output {
            writeln!(f, "Output: {}", output.display())?;
        }
        write!(f, "Elapsed: {:.2?}", self.elapsed)
    }
}

/// Builds the operation named by the configuration
pub fn build_operation(config: &OperationConfig) -> Result<Box<dyn TileOperation>> {
    Ok(match config {
        OperationConfig::Command(spec) => Box::new(CommandOperation::new(spec.clone())?),
        OperationConfig::Copy => Box::new(CopyOperation),
    })
}

fn open_layer(layer: &LayerConfig) -> Result<LayerInput> {
    let input = match layer.kind {
        LayerKind::Raster => LayerInput::raster(layer.name.as_str(), RasterSource::open(&layer.path)?),
        LayerKind::Vector => LayerInput::vector(layer.name.as_str(), FeatureCollection::read(&layer.path)?),
    };
    Ok(input
        .with_resampling(layer.resampling)
        .with_vector_options(layer.vector_options())
        .with_epsg(layer.epsg))
}

/// Deletes a mosaic and partial file left by an earlier run
fn remove_previous_mosaic(path: &Path) -> Result<()> {
    for file in [path.to_path_buf(), partial_path(path)] {
        match fs::remove_file(&file) {
            Ok(()) => info!(path = %file.display(), "removed previous mosaic"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Grid and opened inputs of a run
struct Plan {
    grid: Grid,
    layers: Vec<LayerInput>,
    nodata: f64,
    epsg: Option<u32>,
}

/// Orchestrates a tiled run from a configuration
pub struct TilePipeline {
    config: Config,
}

impl TilePipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn prepare(&self) -> Result<Plan> {
        let primary_name = self.config.primary_layer()?.name.clone();
        let layers: Vec<LayerInput> = self.config.layers.iter().map(open_layer).collect::<Result<_>>()?;
        let primary = layers
            .iter()
            .find(|l| l.name == primary_name)
            .and_then(|l| match &l.data {
                LayerData::Raster(source) => Some(source),
                LayerData::Vector(_) => None,
            })
            .ok_or_else(|| Error::Configuration(format!("Primary layer '{}' is not a raster", primary_name)))?;

        let pixel_size = self.config.pixel_size()?.unwrap_or(primary.pixel_size());
        let extent = match self.config.extent()? {
            Some(extent) => extent,
            None => primary.extent()?,
        };
        let nodata = self.config.output.nodata.or(primary.nodata()).unwrap_or(0.0);
        let epsg = primary.epsg();

        let grid = compute_grid(
            extent,
            pixel_size,
            self.config.tile_size(),
            self.config.grid.overlap,
            self.config.grid_options(),
        )?;
        info!(
            rows = grid.rows,
            cols = grid.cols,
            tiles = grid.len(),
            extent = %grid.data_extent,
            "planned grid"
        );

        Ok(Plan {
            grid,
            layers,
            nodata,
            epsg,
        })
    }

    /// Plans the grid without extracting anything
    pub fn plan(&self) -> Result<Grid> {
        Ok(self.prepare()?.grid)
    }

    fn merge_options(&self, plan: &Plan) -> Result<MergeOptions> {
        let final_clip = self
            .config
            .output
            .final_clip
            .as_ref()
            .map(Footprint::read)
            .transpose()?;
        Ok(MergeOptions {
            output_extent: None,
            nodata: plan.nodata,
            final_clip,
            target_epsg: self.config.output.epsg.or(plan.epsg),
            compression: self.config.output.compression,
            big_tiff: self.config.output.bigtiff,
        })
    }

    /// Runs the configured operation
    pub fn run_configured(&self) -> Result<RunReport> {
        let op = build_operation(&self.config.operation)?;
        self.run(op.as_ref())
    }

    /// Runs a full partition, process and merge cycle with `op`
    pub fn run(&self, op: &dyn TileOperation) -> Result<RunReport> {
        let started = Instant::now();
        let plan = self.prepare()?;
        let grid = &plan.grid;
        let output = self.config.output.path.clone();
        remove_previous_mosaic(&output)?;

        let extractor = TileExtractor::new(plan.nodata, self.config.output.compression, plan.epsg);
        let sets = plan
            .layers
            .iter()
            .map(|layer| extractor.extract_layer(layer, grid, &self.config.layer_dir(&layer.name)))
            .collect::<Result<Vec<_>>>()?;
        let joined = join_layers(&sets)?;

        let primary = self.config.primary_layer()?.name.clone();
        let output_dir = self.config.output_dir();
        fs::create_dir_all(&output_dir)?;
        let jobs = joined
            .into_iter()
            .map(|(id, inputs)| {
                let tile = grid
                    .tile(&id)
                    .ok_or_else(|| Error::Addressing(format!("Tile {} is not part of the grid", id)))?;
                Ok(TileJob {
                    tile: tile.clone(),
                    inputs,
                    primary: primary.clone(),
                    output: tile_path(&output_dir, RESULT_PREFIX, tile, "tif"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let executor = ParallelExecutor::new(self.config.execution);
        let results = executor.run(jobs, op);
        write_manifest(&self.config.manifest_path(), &results)?;
        executor.check_results(&results)?;

        merge_to_file(&results, grid, &self.merge_options(&plan)?, &output)?;

        let report = RunReport::from_results(&results, Some(output), started.elapsed());
        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(report)
    }

    /// Merges tile outputs listed in an existing manifest
    pub fn merge_existing(&self) -> Result<RunReport> {
        let started = Instant::now();
        let plan = self.prepare()?;
        let output = self.config.output.path.clone();
        remove_previous_mosaic(&output)?;
        let results = read_manifest(&self.config.manifest_path())?;
        ParallelExecutor::new(self.config.execution).check_results(&results)?;
        merge_to_file(&results, &plan.grid, &self.merge_options(&plan)?, &output)?;
        Ok(RunReport::from_results(&results, Some(output), started.elapsed()))
    }
}
