//! Run configuration loaded from TOML

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::executor::{CommandSpec, ExecutorConfig};
use crate::formats::tiff::BigTiff;
use crate::extract::{Resampling, VectorOptions};
use crate::grid::{BufferFormula, Extent, GridOptions, PixelSize, RemainderPolicy, TileSize};
use crate::manifest::MANIFEST_FILE;

/// Work directory subfolder of per-tile operation outputs
const OUTPUT_DIR: &str = "out";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default)]
    pub overlap: u32,
    #[serde(default)]
    pub remainder: RemainderPolicy,
    #[serde(default)]
    pub buffer_formula: BufferFormula,
    /// Target resolution; the primary layer's when unset
    #[serde(default)]
    pub pixel_size: Option<[f64; 2]>,
    /// `[xmin, xmax, ymin, ymax]`; the primary layer's extent when unset
    #[serde(default)]
    pub extent: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Raster,
    Vector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub kind: LayerKind,
    pub path: PathBuf,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub resampling: Resampling,
    /// CRS of a vector layer whose file does not name one
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default)]
    pub prebuffer: Option<f64>,
}

impl LayerConfig {
    pub fn vector_options(&self) -> VectorOptions {
        VectorOptions {
            prebuffer: self.prebuffer,
        }
    }
}

/// The per-tile operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationConfig {
    Command(CommandSpec),
    Copy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub work_dir: PathBuf,
    pub path: PathBuf,
    /// Nodata of tiles and mosaic; the primary layer's, else 0, when unset
    #[serde(default)]
    pub nodata: Option<f64>,
    #[serde(default)]
    pub compression: Compression,
    /// When the mosaic is written as BigTIFF
    #[serde(default)]
    pub bigtiff: BigTiff,
    /// GeoJSON polygons the mosaic is clipped to
    #[serde(default)]
    pub final_clip: Option<PathBuf>,
    /// CRS the mosaic must carry; the primary layer's when unset
    #[serde(default)]
    pub epsg: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub execution: ExecutorConfig,
    pub operation: OperationConfig,
    pub output: OutputConfig,
}

fn valid_layer_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Config {
    /// Loads and validates a configuration file
    ///
    /// Relative paths in the file are resolved against its directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parses and validates a configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.layers.iter_mut().for_each(|l| resolve(&mut l.path));
        resolve(&mut self.output.work_dir);
        resolve(&mut self.output.path);
        if let Some(clip) = self.output.final_clip.as_mut() {
            resolve(clip);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::Configuration(msg));

        if self.grid.tile_width == 0 || self.grid.tile_height == 0 {
            return invalid(format!(
                "grid: tile size must be positive, got {} x {}",
                self.grid.tile_width, self.grid.tile_height
            ));
        }
        self.pixel_size()?;
        self.extent()?;

        if self.layers.is_empty() {
            return invalid("layers: at least one layer is required".to_string());
        }
        let mut names = HashSet::new();
        for layer in &self.layers {
            if !valid_layer_name(&layer.name) {
                return invalid(format!(
                    "layers: name '{}' must use letters, digits, '_' or '-'",
                    layer.name
                ));
            }
            if layer.name == OUTPUT_DIR {
                return invalid(format!("layers: name '{}' is reserved for tile outputs", layer.name));
            }
            if !names.insert(layer.name.as_str()) {
                return invalid(format!("layers: duplicate layer name '{}'", layer.name));
            }
            match (layer.kind, layer.prebuffer) {
                (LayerKind::Raster, Some(_)) => {
                    return invalid(format!("layers: prebuffer is only valid for vector layer '{}'", layer.name));
                }
                (LayerKind::Vector, Some(d)) if !(d.is_finite() && d >= 0.0) => {
                    return invalid(format!("layers: prebuffer of '{}' must be >= 0", layer.name));
                }
                _ => {}
            }
        }

        let primaries: Vec<&LayerConfig> = self.layers.iter().filter(|l| l.primary).collect();
        if primaries.len() > 1 {
            return invalid("layers: only one layer may be primary".to_string());
        }
        let primary = self.primary_layer()?;
        if primary.kind != LayerKind::Raster {
            return invalid(format!("layers: primary layer '{}' must be a raster", primary.name));
        }

        if self.execution.concurrency == 0 {
            return invalid("execution: concurrency must be at least 1".to_string());
        }

        if let OperationConfig::Command(spec) = &self.operation {
            spec.validate()?;
            for arg in &spec.args {
                for (start, _) in arg.match_indices("{input:") {
                    let rest = &arg[start + "{input:".len()..];
                    let layer = rest.split('}').next().unwrap_or_default();
                    if !names.contains(layer) {
                        return invalid(format!("operation: placeholder refers to unknown layer '{}'", layer));
                    }
                }
            }
        }

        Ok(())
    }

    /// The primary layer: the one marked primary, else the first raster layer
    pub fn primary_layer(&self) -> Result<&LayerConfig> {
        self.layers
            .iter()
            .find(|l| l.primary)
            .or_else(|| self.layers.iter().find(|l| l.kind == LayerKind::Raster))
            .ok_or_else(|| Error::Configuration("layers: no raster layer to drive the grid".to_string()))
    }

    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.grid.tile_width, self.grid.tile_height)
    }

    pub fn grid_options(&self) -> GridOptions {
        GridOptions {
            remainder: self.grid.remainder,
            buffer: self.grid.buffer_formula,
        }
    }

    pub fn pixel_size(&self) -> Result<Option<PixelSize>> {
        self.grid
            .pixel_size
            .map(|[w, h]| PixelSize::new(w, h))
            .transpose()
    }

    pub fn extent(&self) -> Result<Option<Extent>> {
        self.grid
            .extent
            .map(|[xmin, xmax, ymin, ymax]| Extent::new(xmin, xmax, ymin, ymax))
            .transpose()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output.work_dir.join(MANIFEST_FILE)
    }

    /// Directory of extracted tiles of one layer
    pub fn layer_dir(&self, layer: &str) -> PathBuf {
        self.output.work_dir.join(layer)
    }

    /// Directory the per-tile operation writes to
    pub fn output_dir(&self) -> PathBuf {
        self.output.work_dir.join(OUTPUT_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FailurePolicy, Scheduling};

    const FULL: &str = r#"
[grid]
tile_width = 1000
tile_height = 800
overlap = 10
remainder = "extend"
buffer_formula = "legacy-x-resolution"
pixel_size = [0.5, 0.5]

[[layers]]
name = "dem"
kind = "raster"
path = "input/dem.tif"
primary = true
resampling = "bilinear"

[[layers]]
name = "labels"
kind = "vector"
path = "input/labels.geojson"
epsg = 2154
prebuffer = 5.0

[execution]
concurrency = 6
scheduling = "waves"
failure_policy = "continue"

[operation]
kind = "command"
program = "saga_cmd"
args = ["ta_lighting", "3", "-DEM", "{input}", "-MASK", "{input:labels}", "-SVF", "{output}"]

[output]
work_dir = "work"
path = "out/result.tif"
nodata = -9999.0
compression = "lzw"
bigtiff = "always"
final_clip = "input/footprint.geojson"
epsg = 2154
"#;

    const MINIMAL: &str = r#"
[grid]
tile_width = 256
tile_height = 256

[[layers]]
name = "dem"
kind = "raster"
path = "dem.tif"

[operation]
kind = "copy"

[output]
work_dir = "work"
path = "out.tif"
"#;

    #[test]
    fn test_parse_full() {
        let config = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config.tile_size(), TileSize::new(1000, 800));
        assert_eq!(config.grid_options().remainder, RemainderPolicy::Extend);
        assert_eq!(config.grid_options().buffer, BufferFormula::LegacyXResolution);
        assert_eq!(config.pixel_size().unwrap(), Some(PixelSize::square(0.5).unwrap()));
        assert_eq!(config.layers[0].resampling, Resampling::Bilinear);
        assert_eq!(config.layers[1].vector_options().prebuffer, Some(5.0));
        assert_eq!(config.execution.scheduling, Scheduling::Waves);
        assert_eq!(config.execution.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.output.compression, Compression::Lzw);
        assert_eq!(config.output.bigtiff, BigTiff::Always);
        match &config.operation {
            OperationConfig::Command(spec) => assert_eq!(spec.program, "saga_cmd"),
            other => panic!("unexpected operation {:?}", other),
        }
        assert_eq!(config.primary_layer().unwrap().name, "dem");
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.grid.overlap, 0);
        assert_eq!(config.grid_options(), GridOptions::default());
        assert_eq!(config.operation, OperationConfig::Copy);
        assert_eq!(config.execution.failure_policy, FailurePolicy::FailFast);
        assert!(config.execution.concurrency >= 1);
        assert_eq!(config.output.compression, Compression::Deflate);
        assert_eq!(config.output.bigtiff, BigTiff::IfNeeded);
        assert_eq!(config.manifest_path(), PathBuf::from("work/manifest.csv"));
        assert_eq!(config.layer_dir("dem"), PathBuf::from("work/dem"));
    }

    #[test]
    fn test_invalid_configurations() {
        let cases = [
            MINIMAL.replace("tile_width = 256", "tile_width = 0"),
            MINIMAL.replace("name = \"dem\"", "name = \"my dem\""),
            MINIMAL.replace("kind = \"raster\"", "kind = \"vector\""),
            MINIMAL.replace("[operation]\nkind = \"copy\"", "[operation]\nkind = \"command\"\nprogram = \"x\"\nargs = [\"{input:nope}\"]"),
            MINIMAL.replace("[operation]\nkind = \"copy\"", "[operation]\nkind = \"command\"\nprogram = \"x\"\nargs = [\"{bogus}\"]"),
            MINIMAL.replace("tile_height = 256", "tile_height = 256\npixel_size = [0.0, 1.0]"),
            MINIMAL.replace("tile_height = 256", "tile_height = 256\nextent = [10.0, 0.0, 0.0, 10.0]"),
            format!("{}\n[execution]\nconcurrency = 0\n", MINIMAL),
            MINIMAL.replace("kind = \"copy\"", "kind = \"teleport\""),
        ];
        for (i, case) in cases.iter().enumerate() {
            assert!(
                matches!(Config::from_toml_str(case), Err(Error::Configuration(_))),
                "case {} accepted",
                i
            );
        }
    }

    #[test]
    fn test_relative_paths_resolve_against_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, MINIMAL).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.layers[0].path, dir.path().join("dem.tif"));
        assert_eq!(config.output.work_dir, dir.path().join("work"));
    }
}
