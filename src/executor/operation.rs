//! Per-tile operations

use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{Error, Result};
use crate::grid::layers::TileInputs;
use crate::grid::{TileId, TileSpec};

/// Everything a per-tile operation needs for one tile
#[derive(Debug, Clone, PartialEq)]
pub struct TileJob {
    pub tile: TileSpec,
    /// Extracted input of every layer, `None` when the layer is empty here
    pub inputs: TileInputs,
    /// Name of the layer whose emptiness skips the tile
    pub primary: String,
    /// Tile-unique path the operation must write
    pub output: PathBuf,
}

impl TileJob {
    pub fn id(&self) -> TileId {
        self.tile.id
    }

    /// Input file of a layer, if the tile holds data for it
    pub fn input(&self, layer: &str) -> Option<&Path> {
        self.inputs.get(layer).and_then(|p| p.as_deref())
    }

    pub fn primary_input(&self) -> Option<&Path> {
        self.input(&self.primary)
    }

    /// First of the primary and `required` layers without data for this tile
    pub fn missing_layer<'a>(&'a self, required: &'a [String]) -> Option<&'a str> {
        std::iter::once(self.primary.as_str())
            .chain(required.iter().map(String::as_str))
            .find(|layer| self.input(layer).is_none())
    }
}

/// Opaque operation applied to each tile
///
/// Calls must be idempotent and write only to `job.output`.
pub trait TileOperation: Send + Sync {
    fn process(&self, job: &TileJob) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "closure"
    }

    /// Layers besides the primary one that must hold data for a tile to run
    fn required_layers(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> TileOperation for F
where
    F: Fn(&TileJob) -> Result<()> + Send + Sync,
{
    fn process(&self, job: &TileJob) -> Result<()> {
        self(job)
    }
}

/// Identity operation: copies the primary input to the output
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOperation;

impl TileOperation for CopyOperation {
    fn process(&self, job: &TileJob) -> Result<()> {
        let input = job
            .primary_input()
            .ok_or_else(|| Error::execution(job.id(), format!("no input for layer '{}'", job.primary)))?;
        fs::copy(input, &job.output).map_err(|e| {
            Error::execution(
                job.id(),
                format!("copy {} -> {}: {}", input.display(), job.output.display(), e),
            )
        })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "copy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{compute_grid, Extent, GridOptions, PixelSize, TileSize};
    use tempfile::TempDir;

    fn job(primary: Option<PathBuf>, output: PathBuf) -> TileJob {
        let grid = compute_grid(
            Extent::new(0.0, 4.0, 0.0, 4.0).unwrap(),
            PixelSize::square(1.0).unwrap(),
            TileSize::square(4),
            0,
            GridOptions::default(),
        )
        .unwrap();
        let mut inputs = TileInputs::new();
        inputs.insert("dem".to_string(), primary);
        inputs.insert("labels".to_string(), None);
        TileJob {
            tile: grid.tiles()[0].clone(),
            inputs,
            primary: "dem".to_string(),
            output,
        }
    }

    #[test]
    fn test_inputs() {
        let j = job(Some(PathBuf::from("dem_r001_c001.tif")), PathBuf::from("out.tif"));
        assert_eq!(j.primary_input(), Some(Path::new("dem_r001_c001.tif")));
        assert_eq!(j.input("labels"), None);
        assert_eq!(j.input("missing"), None);
        assert_eq!(j.id(), TileId::new(1, 1));
        assert_eq!(j.missing_layer(&[]), None);
        assert_eq!(j.missing_layer(&["labels".to_string()]), Some("labels"));

        let empty = job(None, PathBuf::from("out.tif"));
        assert_eq!(empty.missing_layer(&["labels".to_string()]), Some("dem"));
    }

    #[test]
    fn test_copy_operation() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.tif");
        fs::write(&input, b"pixels").unwrap();
        let output = dir.path().join("out.tif");

        CopyOperation.process(&job(Some(input), output.clone())).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"pixels");

        let err = CopyOperation.process(&job(None, output)).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
    }

    #[test]
    fn test_closure_is_an_operation() {
        let op = |job: &TileJob| -> Result<()> {
            if job.id().row == 1 {
                Ok(())
            } else {
                Err(Error::execution(job.id(), "unexpected tile"))
            }
        };
        assert!(op.process(&job(None, PathBuf::from("x"))).is_ok());
        assert_eq!(TileOperation::name(&op), "closure");
    }
}
