//! Per-layer tile sets and the cross-layer join

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::error::{Error, Result};
use super::{Grid, TileId};

/// Extracted content of one tile of one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileEntry {
    File(PathBuf),
    /// The tile holds no data for this layer
    Empty,
}

impl TileEntry {
    pub fn path(&self) -> Option<&Path> {
        match self {
            TileEntry::File(path) => Some(path),
            TileEntry::Empty => None,
        }
    }
}

/// Inputs of one tile keyed by layer name; `None` for empty layers
pub type TileInputs = BTreeMap<String, Option<PathBuf>>;

/// Tiles of one layer keyed by tile id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTileSet {
    pub layer: String,
    entries: BTreeMap<TileId, TileEntry>,
}

impl LayerTileSet {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: TileId, entry: TileEntry) {
        self.entries.insert(id, entry);
    }

    pub fn get(&self, id: &TileId) -> Option<&TileEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tile ids in row-major order
    pub fn ids(&self) -> impl Iterator<Item = &TileId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileId, &TileEntry)> {
        self.entries.iter()
    }

    /// Number of tiles without data
    pub fn empty_count(&self) -> usize {
        self.entries.values().filter(|e| **e == TileEntry::Empty).count()
    }

    /// Rebuilds a tile set from files named `<layer>_<tile id>.<ext>` in `dir`
    ///
    /// Files that do not carry this layer's prefix or a tile id are ignored.
    pub fn from_directory(layer: &str, dir: &Path) -> Result<Self> {
        let prefix = format!("{}_", layer);
        let mut set = LayerTileSet::new(layer);

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&prefix) else { continue };
            let Some(id) = TileId::find_in_name(rest) else {
                debug!(file = name, "skipping file without tile id");
                continue;
            };
            // The id must directly follow the layer prefix
            if !rest.starts_with(&id.to_string()) {
                continue;
            }
            if set.entries.contains_key(&id) {
                return Err(Error::Addressing(format!(
                    "Layer '{}' has more than one file for tile {} in {}",
                    layer,
                    id,
                    dir.display()
                )));
            }
            set.insert(id, TileEntry::File(entry.path()));
        }

        Ok(set)
    }

    /// Marks grid tiles without a file as empty and rejects ids outside the grid
    pub fn complete_with(mut self, grid: &Grid) -> Result<Self> {
        if let Some(stray) = self.entries.keys().find(|id| grid.tile(id).is_none()) {
            return Err(Error::Addressing(format!(
                "Layer '{}' has tile {} outside the {} x {} grid",
                self.layer, stray, grid.rows, grid.cols
            )));
        }
        for tile in grid.tiles() {
            self.entries.entry(tile.id).or_insert(TileEntry::Empty);
        }
        Ok(self)
    }
}

/// Joins layer tile sets on tile id
///
/// Every layer must cover exactly the same ids; any divergence is an
/// addressing error naming the offending layer and ids.
pub fn join_layers(sets: &[LayerTileSet]) -> Result<BTreeMap<TileId, TileInputs>> {
    let Some(reference) = sets.first() else {
        return Ok(BTreeMap::new());
    };

    for set in &sets[1..] {
        let missing: Vec<String> = reference
            .ids()
            .filter(|id| set.get(id).is_none())
            .take(5)
            .map(ToString::to_string)
            .collect();
        let extra: Vec<String> = set
            .ids()
            .filter(|id| reference.get(id).is_none())
            .take(5)
            .map(ToString::to_string)
            .collect();

        if !missing.is_empty() || !extra.is_empty() {
            return Err(Error::Addressing(format!(
                "Layer '{}' does not match layer '{}': missing [{}], unexpected [{}]",
                set.layer,
                reference.layer,
                missing.join(", "),
                extra.join(", ")
            )));
        }
    }

    let mut joined = BTreeMap::new();
    for id in reference.ids() {
        let inputs: TileInputs = sets
            .iter()
            .map(|set| {
                let path = set.get(id).and_then(|e| e.path()).map(Path::to_path_buf);
                (set.layer.clone(), path)
            })
            .collect();
        joined.insert(*id, inputs);
    }
    Ok(joined)
}
