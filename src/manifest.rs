//! Tile manifest: one CSV row per tile, sorted by tile id

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{Error, Result};
use crate::executor::{ProcessingResult, TaskStatus};
use crate::grid::TileId;

/// File name of the manifest inside a work directory
pub const MANIFEST_FILE: &str = "manifest.csv";

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    tile_id: TileId,
    row: u32,
    col: u32,
    status: TaskStatus,
    output: PathBuf,
    error: Option<String>,
}

/// Writes the manifest of a run
pub fn write_manifest(path: &Path, results: &[ProcessingResult]) -> Result<()> {
    let mut sorted: Vec<&ProcessingResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.tile);

    let mut writer = csv::Writer::from_path(path)?;
    for result in sorted {
        writer.serialize(Record {
            tile_id: result.tile,
            row: result.tile.row,
            col: result.tile.col,
            status: result.status,
            output: result.output.clone(),
            error: result.error.clone(),
        })?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = results.len(), "wrote manifest");
    Ok(())
}

/// Reads a manifest back into processing results
pub fn read_manifest(path: &Path) -> Result<Vec<ProcessingResult>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut results = Vec::new();
    for record in reader.deserialize() {
        let record: Record = record?;
        if (record.row, record.col) != (record.tile_id.row, record.tile_id.col) {
            return Err(Error::Addressing(format!(
                "Manifest row for {} says row {} col {}",
                record.tile_id, record.row, record.col
            )));
        }
        results.push(ProcessingResult {
            tile: record.tile_id,
            output: record.output,
            status: record.status,
            error: record.error.filter(|e| !e.is_empty()),
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(row: u32, col: u32, status: TaskStatus, error: Option<&str>) -> ProcessingResult {
        let tile = TileId::new(row, col);
        ProcessingResult {
            tile,
            output: PathBuf::from(format!("work/out/out_{}.tif", tile)),
            status,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_write_sorted_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let results = vec![
            result(2, 1, TaskStatus::Failed, Some("exit code 2, \"disk full\"")),
            result(1, 2, TaskStatus::Skipped, Some("layer 'dem' has no data for this tile")),
            result(1, 1, TaskStatus::Success, None),
        ];
        write_manifest(&path, &results).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "tile_id,row,col,status,output,error");
        assert_eq!(lines[1], "r001_c001,1,1,success,work/out/out_r001_c001.tif,");
        assert!(lines[2].starts_with("r001_c002,1,2,skipped,"));

        let back = read_manifest(&path).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0], results[2]);
        assert_eq!(back[2], results[0]);
    }

    #[test]
    fn test_inconsistent_row_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(&path, "tile_id,row,col,status,output,error\nr001_c002,1,3,success,a.tif,\n").unwrap();
        assert!(matches!(read_manifest(&path), Err(Error::Addressing(_))));
    }

    #[test]
    fn test_bad_tile_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(&path, "tile_id,row,col,status,output,error\ntile1,1,1,success,a.tif,\n").unwrap();
        assert!(read_manifest(&path).is_err());
    }
}
