//! I/O utilities for tilemosaic
//!
//! Byte order handling and bounds-checked decoding over memory-mapped files.

pub mod byte_order;

pub use byte_order::{ByteOrder, SliceReader};
