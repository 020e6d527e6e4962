//! Error types for tilemosaic

use std::io;
use thiserror::Error;

use crate::grid::TileId;

/// Result type for tilemosaic operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while partitioning, processing or merging
#[derive(Debug, Error)]
pub enum Error {
    /// Bad extent, pixel size, tile size or configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Clip or resample failure for one tile of one layer
    #[error("Extraction failed for tile {tile} of layer '{layer}': {message}")]
    Extraction {
        tile: TileId,
        layer: String,
        message: String,
    },

    /// The per-tile operation reported failure
    #[error("Execution failed for tile {tile}: {message}")]
    Execution { tile: TileId, message: String },

    /// Mosaic, re-trim or final clip failure
    #[error("Merge error: {0}")]
    Merge(String),

    /// Tile id decode failure or cross-layer id mismatch
    #[error("Addressing error: {0}")]
    Addressing(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid raster or vector file format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid TIFF magic number
    #[error("Invalid TIFF magic number: {0}")]
    InvalidMagic(u16),

    /// Missing required tag
    #[error("Missing required tag: {0}")]
    MissingTag(u16),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Spatial reference error
    #[error("Projection error: {0}")]
    Projection(String),

    /// JSON, CSV or TOML (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wraps any error as an extraction failure of one tile and layer
    pub fn extraction(tile: TileId, layer: &str, err: impl std::fmt::Display) -> Self {
        Error::Extraction {
            tile,
            layer: layer.to_string(),
            message: err.to_string(),
        }
    }

    /// Wraps any error as an execution failure of one tile
    pub fn execution(tile: TileId, err: impl std::fmt::Display) -> Self {
        Error::Execution {
            tile,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(error: csv::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidFormat("test".to_string());
        assert_eq!(err.to_string(), "Invalid format: test");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_execution_error_names_tile() {
        let err = Error::execution(TileId::new(3, 7), "exit status 2");
        let msg = err.to_string();
        assert!(msg.contains("r003_c007"));
        assert!(msg.contains("exit status 2"));
    }

    #[test]
    fn test_extraction_error_names_layer() {
        let err = Error::extraction(TileId::new(1, 1), "labels", "short read");
        assert!(err.to_string().contains("'labels'"));
    }

    #[test]
    fn test_missing_tag() {
        let err = Error::MissingTag(256);
        assert!(err.to_string().contains("256"));
    }
}
